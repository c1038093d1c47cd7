/*!
Mismatch reporting.

Each bit-flip event produces two records, `old` (reference) and `new`
(observed), carrying timestamp, iteration, probe name, 1-bit count, scan
position and the raw bytes. Records go to stdout as tab separated text or as
JSON lines; logging stays on stderr.
*/

use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::thread;
use tracing::{error, info};

use crate::detector::BitFlipEvent;

/// Output format of the report stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Number of bits set to 1 in `bytes`
pub fn ones_in_bytes(bytes: &[u8]) -> u32 {
    bytes.iter().map(|b| b.count_ones()).sum()
}

/// Space separated hex, e.g. `40 6e 00`
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `HH:MM:SS YYYY/MM/DD`
pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%H:%M:%S %Y/%m/%d").to_string()
}

/// One half of a mismatch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: String,
    pub iteration: u64,
    pub source: String,
    pub ones: u32,
    pub kind: &'static str,
    pub scan_id: Option<i64>,
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub bytes: String,
}

impl SnapshotRecord {
    fn new(event: &BitFlipEvent, kind: &'static str, bytes: &[u8]) -> Self {
        Self {
            timestamp: format_timestamp(&event.timestamp),
            iteration: event.iteration,
            source: event.source.clone(),
            ones: ones_in_bytes(bytes),
            kind,
            scan_id: event.position.scan_id,
            x: event.position.x,
            y: event.position.y,
            bytes: hex_bytes(bytes),
        }
    }

    /// Tab separated line
    pub fn to_text(&self) -> String {
        let field = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}:{}:{}\t{}",
            self.timestamp,
            self.iteration,
            self.source,
            self.ones,
            self.kind,
            field(self.scan_id),
            field(self.x),
            field(self.y),
            self.bytes
        )
    }
}

/// The `old` and `new` records for an event
pub fn records(event: &BitFlipEvent) -> [SnapshotRecord; 2] {
    [
        SnapshotRecord::new(event, "old", &event.reference),
        SnapshotRecord::new(event, "new", &event.observed),
    ]
}

/// Writes event records to any sink
pub struct ReportWriter<W: Write> {
    out: W,
    format: ReportFormat,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self { out, format }
    }

    /// Write both records of `event` and flush
    pub fn write_event(&mut self, event: &BitFlipEvent) -> io::Result<()> {
        for record in records(event) {
            match self.format {
                ReportFormat::Text => writeln!(self.out, "{}", record.to_text())?,
                ReportFormat::Json => {
                    let line = serde_json::to_string(&record).map_err(io::Error::other)?;
                    writeln!(self.out, "{}", line)?;
                }
            }
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Report thread - drains events to stdout until every sender is gone
pub fn spawn_report_thread(
    events: Receiver<BitFlipEvent>,
    format: ReportFormat,
) -> thread::JoinHandle<io::Result<u64>> {
    thread::spawn(move || {
        let mut writer = ReportWriter::new(io::stdout(), format);
        let mut written = 0u64;

        for event in events.iter() {
            if let Err(e) = writer.write_event(&event) {
                error!("❌ Failed to write bit flip report: {}", e);
                return Err(e);
            }
            written += 1;
        }

        info!("📝 Report writer finished, {} event(s) written", written);
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::ScanPosition;
    use chrono::TimeZone;

    fn event() -> BitFlipEvent {
        BitFlipEvent {
            source: "readDAC".to_string(),
            iteration: 12,
            timestamp: Local.with_ymd_and_hms(2022, 3, 12, 9, 5, 7).unwrap(),
            reference: vec![0x40, 0x00],
            observed: vec![0x40, 0x08],
            position: ScanPosition { scan_id: Some(42), x: Some(10), y: None },
        }
    }

    #[test]
    fn test_ones_and_hex() {
        assert_eq!(ones_in_bytes(&[0xFF, 0x01, 0x00]), 9);
        assert_eq!(hex_bytes(&[0x40, 0x6E, 0x00]), "40 6e 00");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn test_text_records() {
        let [old, new] = records(&event());
        assert_eq!(old.to_text(), "09:05:07 2022/03/12\t12\treadDAC\t1\told\t42:10:-\t40 00");
        assert_eq!(new.to_text(), "09:05:07 2022/03/12\t12\treadDAC\t2\tnew\t42:10:-\t40 08");
    }

    #[test]
    fn test_json_records() {
        let mut writer = ReportWriter::new(Vec::new(), ReportFormat::Json);
        writer.write_event(&event()).unwrap();
        let output = String::from_utf8(writer.into_inner()).unwrap();

        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "old");
        assert_eq!(lines[1]["kind"], "new");
        assert_eq!(lines[1]["ones"], 2);
        assert_eq!(lines[1]["scan_id"], 42);
        assert!(lines[1]["y"].is_null());
        assert_eq!(lines[1]["bytes"], "40 08");
    }
}
