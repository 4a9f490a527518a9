//! Terminal implementation of [`ResultPresenter`].

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::catalog::CatalogService;
use crate::certs::{CertPair, ScanWarning};
use crate::sandbox::ResultPresenter;

pub struct ConsolePresenter {
    interactive: bool,
}

impl ConsolePresenter {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

/// One-line description of a pair, prefixed with its 1-based position.
pub fn format_pair(position: usize, pair: &CertPair) -> String {
    format!(
        "{:>3}. {}  (issuer: {}, expires {}, {}, {})\n     {}",
        position,
        pair.subject,
        pair.issuer,
        pair.not_after.format("%Y-%m-%d"),
        pair.confidence,
        pair.short_fingerprint(),
        pair.public_path.display()
    )
}

/// Parse a 1-based choice among `count` items into an index.
fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

impl ResultPresenter for ConsolePresenter {
    fn choose_certificate(
        &self,
        service: &CatalogService,
        available: &[CertPair],
    ) -> Option<usize> {
        println!(
            "{} needs a personal certificate. {} were found:",
            service.display_name,
            available.len()
        );
        for (i, pair) in available.iter().enumerate() {
            println!("{}", format_pair(i + 1, pair));
        }

        if !self.interactive {
            println!("Pass --cert <FINGERPRINT> to choose one.");
            return None;
        }

        let mut rl = DefaultEditor::new().ok()?;
        let prompt = format!("Certificate [1-{}, empty to cancel]: ", available.len());
        loop {
            let input = match rl.readline(&prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return None,
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    return None;
                }
            };

            if input.trim().is_empty() {
                return None;
            }
            match parse_choice(&input, available.len()) {
                Some(index) => return Some(index),
                None => println!("Enter a number between 1 and {}.", available.len()),
            }
        }
    }

    fn show_warnings(&self, warnings: &[ScanWarning]) {
        if warnings.is_empty() {
            return;
        }
        eprintln!("{} file(s) could not be inspected:", warnings.len());
        for warning in warnings {
            eprintln!("  warning: {}", warning);
        }
    }

    fn show_error(&self, category: &str, message: &str) {
        eprintln!("Error ({}): {}", category, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::PairConfidence;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("1", 3), Some(0));
        assert_eq!(parse_choice(" 3 \n", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("two", 3), None);
    }

    #[test]
    fn test_format_pair() {
        let pair = CertPair {
            subject: "CN=Bob".to_string(),
            issuer: "CN=yessignCA".to_string(),
            serial: "07:d1".to_string(),
            not_after: Utc.with_ymd_and_hms(2031, 5, 2, 0, 0, 0).unwrap(),
            public_path: PathBuf::from("/home/bob/NPKI/signCert.der"),
            private_path: PathBuf::from("/home/bob/NPKI/signPri.key"),
            confidence: PairConfidence::BestEffort,
            fingerprint: "0123456789abcdef0123".to_string(),
        };
        let line = format_pair(2, &pair);
        assert!(line.starts_with("  2. CN=Bob"));
        assert!(line.contains("expires 2031-05-02"));
        assert!(line.contains("best-effort"));
        assert!(line.contains("0123456789abcdef"));
        assert!(!line.contains("0123456789abcdef0123"));
        assert!(line.ends_with("/home/bob/NPKI/signCert.der"));
    }
}
