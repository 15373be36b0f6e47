//! RecordSink — приёмник потоковой доставки: одна запись на строку результата.

use std::io::{self, Write};

pub trait RecordSink {
    /// Записать одну запись (ключ и/или проекция полей, уже в текстовом виде).
    fn write_record(&mut self, fields: &[&str]) -> io::Result<()>;

    /// Вызывается один раз после последней записи (в том числе после Stop).
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Delimited-text вывод: поля через разделитель, записи через перевод строки.
/// Экранирование не выполняется: значения с разделителем выводятся как есть.
pub struct DelimitedSink<W: Write> {
    out: W,
    separator: u8,
    records: u64,
}

impl<W: Write> DelimitedSink<W> {
    /// Разделитель по умолчанию — табуляция.
    pub fn new(out: W) -> Self {
        Self::with_separator(out, b'\t')
    }

    pub fn with_separator(out: W, separator: u8) -> Self {
        Self {
            out,
            separator,
            records: 0,
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for DelimitedSink<W> {
    fn write_record(&mut self, fields: &[&str]) -> io::Result<()> {
        for (i, f) in fields.iter().enumerate() {
            if i > 0 {
                self.out.write_all(&[self.separator])?;
            }
            self.out.write_all(f.as_bytes())?;
        }
        self.out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_record(&mut self, fields: &[&str]) -> io::Result<()> {
        (**self).write_record(fields)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}
