use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    marker::PhantomData,
    path::Path,
};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Lazy reader over a newline-delimited JSON file. Blank lines are skipped;
/// each item carries its 1-based line number so callers can report skips.
pub struct JsonLines<T, R = BufReader<File>> {
    lines: Lines<R>,
    line_no: usize,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> JsonLines<T> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed opening json lines file: {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<T: DeserializeOwned, R: BufRead> JsonLines<T, R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned, R: BufRead> Iterator for JsonLines<T, R> {
    type Item = (usize, Result<T>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line_no = self.line_no;
            match line {
                Ok(raw) if raw.trim().is_empty() => continue,
                Ok(raw) => {
                    let parsed = serde_json::from_str::<T>(&raw)
                        .with_context(|| format!("invalid json on line {line_no}"));
                    return Some((line_no, parsed));
                }
                Err(err) => {
                    let err = anyhow::Error::new(err).context(format!("failed reading line {line_no}"));
                    return Some((line_no, Err(err)));
                }
            }
        }
    }
}
