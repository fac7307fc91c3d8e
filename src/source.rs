use std::fs::File;
use std::io::{self, BufRead, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use regex::Regex;
use tempfile::TempDir;
use tracing::info;

use crate::error::IngestError;
use crate::remote::{self, HttpFetcher, InputFetcher};

const BOM: char = '\u{feff}';

#[derive(Debug)]
pub struct InputFile {
    path: Utf8PathBuf,
    _download: Option<TempDir>,
}

impl InputFile {
    pub fn resolve(location: &str) -> Result<Self, IngestError> {
        if remote::is_remote(location) {
            let fetcher = HttpFetcher::new()?;
            return Self::download(location, &fetcher);
        }
        Self::local(Utf8PathBuf::from(location))
    }

    pub fn local(path: Utf8PathBuf) -> Result<Self, IngestError> {
        if !path.as_std_path().exists() {
            return Err(IngestError::Filesystem(format!("File '{path}' not found")));
        }
        Ok(Self {
            path,
            _download: None,
        })
    }

    pub fn download(url: &str, fetcher: &dyn InputFetcher) -> Result<Self, IngestError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("kira-ingest")
            .tempdir()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let target = temp_dir.path().join(remote::file_name_from_url(url));
        let path = Utf8PathBuf::from_path_buf(target)
            .map_err(|_| IngestError::Filesystem("non-utf8 download path".to_string()))?;
        info!(url, path = %path, "downloading input");
        fetcher.fetch(url, path.as_std_path())?;
        Ok(Self {
            path,
            _download: Some(temp_dir),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn open(&self) -> Result<Box<dyn BufRead>, IngestError> {
        open_reader(&self.path)
    }
}

pub fn open_reader(path: &Utf8Path) -> Result<Box<dyn BufRead>, IngestError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| IngestError::Filesystem(format!("open {path}: {err}")))?;
    if is_gzip(path) {
        return Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))));
    }
    Ok(Box::new(BufReader::new(file)))
}

pub fn is_gzip(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

pub fn clean_token(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|ch: char| matches!(ch, '\'' | '"' | ','))
        .trim()
}

pub fn strip_bom(value: &str) -> &str {
    value.strip_prefix(BOM).unwrap_or(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimitedFormat {
    Csv,
    Tsv,
    Plain,
}

impl DelimitedFormat {
    pub fn from_path(path: &Utf8Path) -> Result<Self, IngestError> {
        let name = path.file_name().unwrap_or(path.as_str()).to_ascii_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("csv") => Ok(DelimitedFormat::Csv),
            Some("tsv") => Ok(DelimitedFormat::Tsv),
            Some("txt") => Ok(DelimitedFormat::Plain),
            _ => Err(IngestError::UnsupportedFileType(path.to_string())),
        }
    }
}

enum RowSource {
    Delimited(csv::StringRecordsIntoIter<Box<dyn BufRead>>),
    Plain {
        lines: io::Lines<Box<dyn BufRead>>,
        splitter: Regex,
    },
}

pub struct RowReader {
    source: RowSource,
    rows_read: usize,
}

impl RowReader {
    pub fn new(reader: Box<dyn BufRead>, format: DelimitedFormat) -> Result<Self, IngestError> {
        let source = match format {
            DelimitedFormat::Csv | DelimitedFormat::Tsv => {
                let delimiter = if format == DelimitedFormat::Csv {
                    b','
                } else {
                    b'\t'
                };
                let records = csv::ReaderBuilder::new()
                    .delimiter(delimiter)
                    .has_headers(false)
                    .flexible(true)
                    .trim(csv::Trim::All)
                    .from_reader(reader)
                    .into_records();
                RowSource::Delimited(records)
            }
            DelimitedFormat::Plain => RowSource::Plain {
                lines: reader.lines(),
                splitter: Regex::new(r"[^,\s]+")
                    .map_err(|err| IngestError::Format(err.to_string()))?,
            },
        };
        Ok(Self {
            source,
            rows_read: 0,
        })
    }

    pub fn open(path: &Utf8Path) -> Result<Self, IngestError> {
        let format = DelimitedFormat::from_path(path)?;
        Self::new(open_reader(path)?, format)
    }

    fn next_raw(&mut self) -> Option<Result<Vec<String>, IngestError>> {
        match &mut self.source {
            RowSource::Delimited(records) => records.next().map(|record| {
                record
                    .map(|record| {
                        record
                            .iter()
                            .map(|token| clean_token(token).to_string())
                            .collect()
                    })
                    .map_err(|err| IngestError::Format(format!("malformed row: {err}")))
            }),
            RowSource::Plain { lines, splitter } => lines.next().map(|line| {
                line.map(|line| {
                    splitter
                        .find_iter(&line)
                        .map(|token| clean_token(token.as_str()).to_string())
                        .collect()
                })
                .map_err(|err| IngestError::Filesystem(err.to_string()))
            }),
        }
    }
}

impl Iterator for RowReader {
    type Item = Result<Vec<String>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut row = match self.next_raw()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            if row.iter().all(|token| token.is_empty()) {
                continue;
            }
            if self.rows_read == 0 {
                if let Some(first) = row.first_mut() {
                    *first = strip_bom(first).to_string();
                }
            }
            self.rows_read += 1;
            return Some(Ok(row));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Cursor, Read};
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::*;

    struct StaticFetcher(&'static str);

    impl InputFetcher for StaticFetcher {
        fn fetch(&self, _url: &str, destination: &Path) -> Result<(), IngestError> {
            fs::write(destination, self.0).map_err(|err| IngestError::Filesystem(err.to_string()))
        }
    }

    struct MissingFetcher;

    impl InputFetcher for MissingFetcher {
        fn fetch(&self, _url: &str, _destination: &Path) -> Result<(), IngestError> {
            Err(IngestError::DownloadStatus {
                status: 404,
                message: "not found".to_string(),
            })
        }
    }

    #[test]
    fn download_lands_in_temp_dir_named_after_url() {
        let input = InputFile::download(
            "https://example.org/files/dense.csv?token=abc",
            &StaticFetcher("GENE,c1\nG1,1\n"),
        )
        .unwrap();
        assert_eq!(input.path().file_name(), Some("dense.csv"));

        let mut content = String::new();
        input.open().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "GENE,c1\nG1,1\n");

        let path = input.path().to_path_buf();
        drop(input);
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn download_failure_propagates() {
        assert_matches!(
            InputFile::download("https://example.org/dense.csv", &MissingFetcher),
            Err(IngestError::DownloadStatus { status: 404, .. })
        );
    }

    fn rows(content: &str, format: DelimitedFormat) -> Vec<Vec<String>> {
        let reader: Box<dyn BufRead> = Box::new(Cursor::new(content.as_bytes().to_vec()));
        RowReader::new(reader, format)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(
            DelimitedFormat::from_path(Utf8Path::new("a/matrix.CSV")).unwrap(),
            DelimitedFormat::Csv
        );
        assert_eq!(
            DelimitedFormat::from_path(Utf8Path::new("matrix.tsv.gz")).unwrap(),
            DelimitedFormat::Tsv
        );
        assert_eq!(
            DelimitedFormat::from_path(Utf8Path::new("matrix.txt")).unwrap(),
            DelimitedFormat::Plain
        );
        assert!(DelimitedFormat::from_path(Utf8Path::new("matrix.loom")).is_err());
    }

    #[test]
    fn clean_token_strips_quotes() {
        assert_eq!(clean_token("' 1.45678 '"), "1.45678");
        assert_eq!(clean_token("\"3.45678\","), "3.45678");
        assert_eq!(clean_token("   "), "");
    }

    #[test]
    fn csv_rows_keep_blank_fields() {
        let parsed = rows("\u{feff}GENE,\"c1\",c2\nG1, 0 ,\n", DelimitedFormat::Csv);
        assert_eq!(parsed[0], vec!["GENE", "c1", "c2"]);
        assert_eq!(parsed[1], vec!["G1", "0", ""]);
    }

    #[test]
    fn plain_rows_split_on_whitespace_and_commas() {
        let parsed = rows("GENE c1\tc2\n\nG1 1.5,0\n", DelimitedFormat::Plain);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], vec!["G1", "1.5", "0"]);
    }

    #[test]
    fn gzip_detection() {
        assert!(is_gzip(Utf8Path::new("barcodes.tsv.GZ")));
        assert!(!is_gzip(Utf8Path::new("barcodes.tsv")));
    }
}
