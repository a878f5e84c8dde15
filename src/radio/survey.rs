//! # Network Survey Parser
//!
//! Decodes `AT#CSURV` output into [`Site`] records.
//!
//! ## Line Formats
//!
//! Each cell is reported on one line of `label: value` pairs, split on whitespace.
//! The leading label identifies the radio technology:
//!
//! | Leading token | Generation | Signal | MCC | MNC | LAC | Cell ID |
//! |---------------|------------|--------|-----|-----|-----|---------|
//! | `arfcn:`      | 2G         | 5      | 9   | 11  | 13  | 15      |
//! | `uarfcn:`     | 3G         | 3      | 5   | 7   | 14  | 12      |
//! | `earfcn:`     | 4G         | 3      | 7   | 9   | 13  | 11      |
//!
//! Lines with any other leading token (banners, `Network survey started ...`)
//! are not cell reports and are ignored.

use tracing::{debug, warn};

use crate::error::CellscanError;
use crate::event::{Generation, Site};

/// Survey command
pub const AT_NETWORK_SURVEY: &str = "AT#CSURV";

/// Token positions for one survey line layout
#[derive(Debug, Clone, Copy)]
pub struct LineFormat {
    pub generation: Generation,
    pub leading_token: &'static str,
    pub signal: usize,
    pub mcc: usize,
    pub mnc: usize,
    pub lac: usize,
    pub cell_id: usize,
}

impl LineFormat {
    /// Smallest token count that holds every field of this layout
    pub const fn min_tokens(&self) -> usize {
        let mut max = self.signal;
        let fields = [self.mcc, self.mnc, self.lac, self.cell_id];
        let mut i = 0;
        while i < fields.len() {
            if fields[i] > max {
                max = fields[i];
            }
            i += 1;
        }
        max + 1
    }

    fn extract(&self, tokens: &[&str]) -> Site {
        Site {
            generation: self.generation,
            mcc: tokens[self.mcc].to_string(),
            mnc: tokens[self.mnc].to_string(),
            lac: tokens[self.lac].to_string(),
            cell_id: tokens[self.cell_id].to_string(),
            signal_level: tokens[self.signal].to_string(),
        }
    }
}

/// Known survey layouts
///
/// ```text
/// arfcn: 512 bsic: 33 rxLev: -71 ber: 0.00 mcc: 310 mnc: 410 lac: 7841 cellId: 29331 ...
/// uarfcn: 4385 rxLev: -82 mcc: 310 mnc: 410 scr code: 402 cellId: 81915 lac: 7841 ...
/// earfcn: 5110 rxLev: -95 pci: 268 mcc: 310 mnc: 410 cellId: 1966338 tac: 7841 ...
/// ```
pub const SURVEY_FORMATS: &[LineFormat] = &[
    LineFormat {
        generation: Generation::G2,
        leading_token: "arfcn:",
        signal: 5,
        mcc: 9,
        mnc: 11,
        lac: 13,
        cell_id: 15,
    },
    LineFormat {
        generation: Generation::G3,
        leading_token: "uarfcn:",
        signal: 3,
        mcc: 5,
        mnc: 7,
        lac: 14,
        cell_id: 12,
    },
    LineFormat {
        generation: Generation::G4,
        leading_token: "earfcn:",
        signal: 3,
        mcc: 7,
        mnc: 9,
        lac: 13,
        cell_id: 11,
    },
];

/// Parsed cells plus the lines that could not be decoded
#[derive(Debug, Default)]
pub struct SurveyReport {
    pub sites: Vec<Site>,
    pub skipped: Vec<CellscanError>,
}

/// Decode a single survey line
///
/// # Returns
///
/// * `None` - Line is not a cell report
/// * `Some(Ok(site))` - Decoded cell
/// * `Some(Err(Parse))` - Cell report with too few fields
pub fn parse_line(line: &str) -> Option<Result<Site, CellscanError>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let leading = *tokens.first()?;
    let format = SURVEY_FORMATS.iter().find(|f| f.leading_token == leading)?;

    if tokens.len() < format.min_tokens() {
        return Some(Err(CellscanError::Parse(format!(
            "{} line has {} fields, expected at least {}: {}",
            format.generation,
            tokens.len(),
            format.min_tokens(),
            line
        ))));
    }

    Some(Ok(format.extract(&tokens)))
}

/// Decode a full survey response
///
/// A bad line is logged and skipped; it never discards the rest of the survey.
pub fn parse_survey<S: AsRef<str>>(lines: &[S]) -> SurveyReport {
    let mut report = SurveyReport::default();

    for line in lines {
        let line = line.as_ref();
        debug!("Parsing line: {}", line);
        match parse_line(line) {
            Some(Ok(site)) => report.sites.push(site),
            Some(Err(e)) => {
                warn!("Skipping survey line: {}", e);
                report.skipped.push(e);
            }
            None => {}
        }
    }

    report
}
