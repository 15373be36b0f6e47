//! Boyer–Moore substring matcher (предвычисление под фиксированный needle).
//!
//! - bad-character: для каждого байта — последний индекс в needle без финального байта (-1 если нет);
//! - good-suffix: для каждой длины совпавшего суффикса — минимальный сдвиг, при котором суффикс
//!   снова встречается раньше в needle (выход за начало needle считается совпадением), с отсевом
//!   избыточных сдвигов: байт перед ранним вхождением не должен совпадать с байтом перед текущим
//!   совпадением;
//! - окно сканируется справа налево, сдвиг = max(bad-char, good-suffix);
//! - nocase: needle и haystack сравниваются после ASCII-folding.
//!
//! Используется search engine для substring-предикатов (contains); в планировании не участвует.

#[derive(Debug, Clone)]
pub struct BoyerMoore {
    needle: Vec<u8>,
    nocase: bool,
    last: [isize; 256],
    /// good[s] — сдвиг при s совпавших байтах (s = 0..=m).
    good: Vec<usize>,
}

#[inline]
fn fold(b: u8, nocase: bool) -> u8 {
    if nocase {
        b.to_ascii_lowercase()
    } else {
        b
    }
}

impl BoyerMoore {
    pub fn new(needle: &[u8], nocase: bool) -> Self {
        let needle: Vec<u8> = needle.iter().map(|&b| fold(b, nocase)).collect();
        let m = needle.len();

        let mut last = [-1isize; 256];
        if m > 0 {
            for (i, &b) in needle[..m - 1].iter().enumerate() {
                last[b as usize] = i as isize;
            }
        }

        let mut good = vec![m.max(1); m + 1];
        for (s, slot) in good.iter_mut().enumerate() {
            *slot = Self::good_shift(&needle, s);
        }

        Self {
            needle,
            nocase,
            last,
            good,
        }
    }

    /// Минимальный сдвиг d для s совпавших байт суффикса.
    fn good_shift(needle: &[u8], s: usize) -> usize {
        let m = needle.len();
        if m == 0 {
            return 1;
        }
        for d in 1..m {
            // совпавший суффикс needle[m-s..m] должен встретиться на d раньше
            let suffix_ok = (0..s).all(|k| {
                let i = m - 1 - k;
                i < d || needle[i - d] == needle[i]
            });
            if !suffix_ok {
                continue;
            }
            // отсев избыточного сдвига: перед ранним вхождением должен стоять другой байт
            if s < m {
                let j = m - 1 - s;
                if j >= d && needle[j - d] == needle[j] {
                    continue;
                }
            }
            return d;
        }
        m
    }

    #[inline]
    pub fn needle_len(&self) -> usize {
        self.needle.len()
    }

    #[inline]
    pub fn is_nocase(&self) -> bool {
        self.nocase
    }

    /// Первое вхождение needle в haystack.
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        self.find_from(haystack, 0)
    }

    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.find(haystack).is_some()
    }

    /// Все (возможно перекрывающиеся) вхождения.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut from = 0;
        while let Some(pos) = self.find_from(haystack, from) {
            out.push(pos);
            from = pos + self.good[self.needle.len()];
        }
        out
    }

    fn find_from(&self, haystack: &[u8], start: usize) -> Option<usize> {
        let m = self.needle.len();
        let n = haystack.len();
        if m == 0 {
            return if start <= n { Some(start) } else { None };
        }
        let mut i = start;
        while i + m <= n {
            let mut j = m;
            while j > 0 && self.needle[j - 1] == fold(haystack[i + j - 1], self.nocase) {
                j -= 1;
            }
            if j == 0 {
                return Some(i);
            }
            let jm = j - 1; // позиция несовпадения
            let c = fold(haystack[i + jm], self.nocase);
            let bc = jm as isize - self.last[c as usize];
            let gs = self.good[m - 1 - jm] as isize;
            i += bc.max(gs).max(1) as usize;
        }
        None
    }
}

/// Разовый поиск needle в haystack (с учётом регистра).
pub fn search(haystack: &str, needle: &str) -> Option<usize> {
    BoyerMoore::new(needle.as_bytes(), false).find(haystack.as_bytes())
}

/// Разовый поиск без учёта регистра (ASCII).
pub fn search_nocase(haystack: &str, needle: &str) -> Option<usize> {
    BoyerMoore::new(needle.as_bytes(), true).find(haystack.as_bytes())
}
