use std::io::{self, Write};

use serde::Serialize;

use crate::dispatcher::DispatchSummary;
use crate::scoring::ScoreResult;
use crate::store::StoreStats;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &DispatchSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_stats(stats: &StoreStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_score(result: &ScoreResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
