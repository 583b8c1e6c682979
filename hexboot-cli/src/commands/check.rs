//! Check command: validate an image offline.

use anyhow::{Context, Result};
use console::style;
use hexboot::flash::BYTES_PER_WORD;
use hexboot::{HexRecord, HexSender, LoaderConfig, NativePort, RecordType};
use serde::Serialize;
use std::path::Path;

use crate::config::Config;

#[allow(clippy::cast_possible_truncation)]
const WORD: u32 = BYTES_PER_WORD as u32;

/// What an image would do to a device.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub(crate) struct ImageReport {
    pub lines: usize,
    pub data: usize,
    pub extended_address: usize,
    pub end_of_file: usize,
    pub other: usize,
    pub data_bytes: usize,
    /// First word written.
    pub first_word: Option<u32>,
    /// One past the last word written.
    pub end_word: Option<u32>,
    /// Data records the loader will skip to protect itself.
    pub protected: usize,
    /// Data records beyond program memory.
    pub out_of_range: usize,
    /// Records following the end of file record, never sent to the loader.
    pub after_end: usize,
    /// Data records at an odd byte address, truncated to the word below.
    pub odd_address: usize,
    /// Records the loader will never acknowledge.
    pub rejected: usize,
}

/// Summarise already validated record lines against a loader layout.
pub(crate) fn analyze(lines: &[String], loader: &LoaderConfig) -> ImageReport {
    let mut report = ImageReport {
        lines: lines.len(),
        ..ImageReport::default()
    };
    let mut extended: u32 = 0;

    for line in lines {
        let Ok(Some(record)) = HexRecord::parse(line.as_bytes()) else {
            continue;
        };
        if report.end_of_file > 0 {
            report.after_end += 1;
        }

        match record.record_type {
            RecordType::Data => {
                report.data += 1;
                report.data_bytes += record.payload().len();

                if record.byte_count == 0 {
                    continue;
                }

                // Same word arithmetic and skip order as the loader
                let linear = (extended << 16) | u32::from(record.address);
                let start = linear / WORD;
                if linear % WORD != 0 {
                    report.odd_address += 1;
                }
                let end = start + u32::from(record.byte_count).div_ceil(WORD);

                if loader.region.overlaps(start, end) {
                    report.protected += 1;
                } else if end > loader.program_words {
                    report.out_of_range += 1;
                }

                report.first_word = Some(report.first_word.map_or(start, |w| w.min(start)));
                report.end_word = Some(report.end_word.map_or(end, |w| w.max(end)));
            },
            RecordType::ExtendedAddress => {
                report.extended_address += 1;
                if let [hi, lo] = record.payload() {
                    extended = u32::from(u16::from_be_bytes([*hi, *lo]));
                } else {
                    report.rejected += 1;
                }
            },
            RecordType::EndOfFile => report.end_of_file += 1,
            RecordType::Other(_) => report.other += 1,
        }
    }

    report
}

/// Check command implementation.
pub(crate) fn cmd_check(config: &Config, image: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;

    let lines = match HexSender::<NativePort>::prepare(&text) {
        Ok(lines) => lines,
        Err(e) => {
            if json {
                let output = serde_json::json!({
                    "ok": false,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            return Err(anyhow::Error::new(e).context(format!("{} is invalid", image.display())));
        },
    };

    let report = analyze(&lines, &config.loader_config());

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style(image.display()).bold().underlined());
    eprintln!("  Records:           {}", report.lines);
    eprintln!("    data:            {} ({} bytes)", report.data, report.data_bytes);
    eprintln!("    extended address: {}", report.extended_address);
    eprintln!("    end of file:     {}", report.end_of_file);
    eprintln!("    other:           {}", report.other);
    if let (Some(first), Some(end)) = (report.first_word, report.end_word) {
        eprintln!("  Word span:         0x{first:06X}..0x{end:06X}");
    }
    if report.protected > 0 {
        eprintln!(
            "  {} {} records overlap the loader and will be skipped",
            style("ℹ").blue(),
            report.protected
        );
    }
    if report.out_of_range > 0 {
        eprintln!(
            "  {} {} records lie beyond program memory and will be skipped",
            style("⚠").yellow(),
            report.out_of_range
        );
    }
    if report.odd_address > 0 {
        eprintln!(
            "  {} {} data records start at an odd byte address and will land one byte early",
            style("⚠").yellow(),
            report.odd_address
        );
    }
    if report.rejected > 0 {
        eprintln!(
            "  {} {} records will be rejected by the loader",
            style("⚠").yellow(),
            report.rejected
        );
    }
    if report.end_of_file == 0 {
        eprintln!(
            "  {} No end of file record: the loader will not reset",
            style("⚠").yellow()
        );
    }
    if report.after_end > 0 {
        eprintln!(
            "  {} {} records follow the end of file record",
            style("⚠").yellow(),
            report.after_end
        );
    }
    eprintln!("{} Image is valid", style("✓").green());

    Ok(())
}
