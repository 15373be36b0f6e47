//! Статистика распределения записей по бакетам.

use std::fmt;

use super::HashTable;

/// Число корзин гистограммы: длины 0..=9 и "10+".
pub const HIST_SLOTS: usize = 11;

#[derive(Debug, Clone, Default)]
pub struct HashStats {
    pub entries: usize,
    pub buckets: usize,
    pub max_chain: usize,
    /// histogram[i] = число бакетов с цепочкой длины i (последний слот — 10 и больше).
    pub histogram: [usize; HIST_SLOTS],
    pub inline: bool,
}

impl HashStats {
    /// Средняя длина цепочки по непустым бакетам.
    pub fn avg_search_distance(&self) -> f64 {
        let used = self.buckets - self.histogram[0];
        if used == 0 {
            0.0
        } else {
            self.entries as f64 / used as f64
        }
    }
}

impl<V> HashTable<V> {
    pub fn stats(&self) -> HashStats {
        let mut st = HashStats {
            entries: self.len(),
            buckets: self.bucket_count(),
            inline: self.is_inline(),
            ..HashStats::default()
        };
        for &head in self.buckets.as_slice() {
            let mut n = 0usize;
            let mut cur = head;
            while let Some(id) = cur {
                n += 1;
                cur = self.entries[id as usize].as_ref().and_then(|e| e.next);
            }
            st.max_chain = st.max_chain.max(n);
            st.histogram[n.min(HIST_SLOTS - 1)] += 1;
        }
        st
    }
}

impl fmt::Display for HashStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} entries in table, {} buckets{}",
            self.entries,
            self.buckets,
            if self.inline { " (inline)" } else { "" }
        )?;
        for (i, n) in self.histogram.iter().enumerate() {
            if i == HIST_SLOTS - 1 {
                writeln!(f, "number of buckets with {}+ entries: {}", i, n)?;
            } else {
                writeln!(f, "number of buckets with {} entries: {}", i, n)?;
            }
        }
        write!(f, "average search distance for entry: {:.1}", self.avg_search_distance())
    }
}
