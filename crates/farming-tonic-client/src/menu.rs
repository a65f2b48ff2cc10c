//! Input parsing and result history for the terminal client.
//!
//! Every line the user types goes through one of the parsers here before
//! anything is sent. A parse failure is reported back and the prompt repeats,
//! so malformed input never reaches the server.

use comfy_table::{ColumnConstraint, Table, Width, presets::ASCII_FULL};
use core::str::FromStr;
use farming_tonic_core::proto::{SoilSample, WateringQuery};

/// Word that ends the program at the menu and ends input inside a stream.
pub const SENTINEL: &str = "done";

pub const MENU: &str = "\
Select an operation:
1: Fertilizer (Calculate)
2: Temperature Stream
3: Average Moisture
4: Optimal Watering Level
5: Display All Results
Enter service number, or type \"done\" to exit: ";

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid choice: {0:?}")]
    UnknownChoice(String),

    #[error("Expected a number, got {0:?}")]
    NotANumber(String),

    #[error("Expected two numbers as \"wet, dry\", got {0:?}")]
    MalformedPair(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuChoice {
    Fertilizer,
    Temperature,
    AverageMoisture,
    OptimalWatering,
    History,
    Exit,
}

impl FromStr for MenuChoice {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choice = s.trim();
        match choice.to_ascii_lowercase().as_str() {
            "1" => Ok(Self::Fertilizer),
            "2" => Ok(Self::Temperature),
            "3" => Ok(Self::AverageMoisture),
            "4" => Ok(Self::OptimalWatering),
            "5" => Ok(Self::History),
            SENTINEL => Ok(Self::Exit),
            _ => Err(ParseError::UnknownChoice(choice.to_string())),
        }
    }
}

/// One line of input inside a streaming call.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamInput<T> {
    Message(T),
    Done,
}

fn is_sentinel(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(SENTINEL)
}

pub fn parse_number(line: &str) -> Result<f64, ParseError> {
    let trimmed = line.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| ParseError::NotANumber(trimmed.to_string()))
}

/// Parses `"wet, dry"` into a sample, or the sentinel.
pub fn parse_sample(line: &str) -> Result<StreamInput<SoilSample>, ParseError> {
    if is_sentinel(line) {
        return Ok(StreamInput::Done);
    }

    let malformed = || ParseError::MalformedPair(line.trim().to_string());
    let mut parts = line.split(',');
    let (Some(wet), Some(dry), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };
    let wet_soil_weight = wet.trim().parse().map_err(|_| malformed())?;
    let dry_soil_weight = dry.trim().parse().map_err(|_| malformed())?;

    Ok(StreamInput::Message(SoilSample {
        wet_soil_weight,
        dry_soil_weight,
    }))
}

/// Parses a single moisture reading, or the sentinel.
pub fn parse_query(line: &str) -> Result<StreamInput<WateringQuery>, ParseError> {
    if is_sentinel(line) {
        return Ok(StreamInput::Done);
    }
    parse_number(line).map(|moisture_reading| StreamInput::Message(WateringQuery { moisture_reading }))
}

/// ASCII table with a header row and one fixed width per column.
///
/// Cells wider than their column wrap onto extra lines.
pub fn results_table(headers: &[&str], widths: &[u16]) -> Table {
    debug_assert_eq!(headers.len(), widths.len());
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_header(headers.to_vec())
        .set_constraints(
            widths
                .iter()
                .map(|w| ColumnConstraint::Absolute(Width::Fixed(*w))),
        );
    table
}

/// Every result produced during this run, oldest first.
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn table(&self) -> Table {
        let mut table = results_table(&["Index", "Result"], &[10, 70]);
        for (i, entry) in self.entries.iter().enumerate() {
            table.add_row(vec![(i + 1).to_string(), entry.clone()]);
        }
        table
    }
}
