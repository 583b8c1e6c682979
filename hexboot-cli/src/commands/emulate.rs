//! Emulate command: act as a device running the loader.
//!
//! The loader runs against a [`SimFlash`] on a real serial port, so a host
//! (this tool's `send`, or any other sender) can be tested without
//! hardware. The flash contents can be kept in a file between runs.

use anyhow::{Context, Result, bail};
use console::style;
use hexboot::flash::{BLANK, BYTES_PER_WORD};
use hexboot::{Loader, LoaderConfig, NativePort, SerialConfig, SessionStats, SimFlash, StreamTransport};
use log::info;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, get_baud, get_port};

/// Flash contents from `path`, or blank flash when there is no file yet.
fn load_flash(path: Option<&Path>, config: &LoaderConfig) -> Result<SimFlash> {
    let size = config.program_words as usize * BYTES_PER_WORD;

    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok(SimFlash::new(config.program_words, config.geometry));
    };

    let mut image =
        fs::read(path).with_context(|| format!("Failed to read flash image {}", path.display()))?;
    if image.len() > size {
        bail!(
            "Flash image {} is {} bytes, larger than {} words of program memory",
            path.display(),
            image.len(),
            config.program_words
        );
    }
    if image.len() < size {
        log::warn!(
            "Flash image {} is short ({} bytes), padding with blank flash",
            path.display(),
            image.len()
        );
        image.resize(size, BLANK);
    }
    Ok(SimFlash::from_image(image, config.geometry))
}

fn save_flash(path: &Path, flash: &SimFlash) -> Result<()> {
    fs::write(path, flash.image())
        .with_context(|| format!("Failed to write flash image {}", path.display()))
}

fn print_stats(stats: &SessionStats) {
    eprintln!(
        "{} Session complete: {} lines, {} rejected, {} records written ({} bytes), {} units erased",
        style("✓").green(),
        stats.lines,
        stats.rejected,
        stats.records_written,
        stats.bytes_written,
        stats.units_erased
    );
    if stats.skipped_protected > 0 || stats.skipped_out_of_range > 0 {
        eprintln!(
            "    {} skipped: {} in the loader region, {} beyond program memory",
            style("•").dim(),
            stats.skipped_protected,
            stats.skipped_out_of_range
        );
    }
}

/// Emulate command implementation.
pub(crate) fn cmd_emulate(
    cli: &Cli,
    config: &mut Config,
    image: Option<&Path>,
    words: Option<u32>,
    redundant: bool,
) -> Result<()> {
    let mut loader_config = config.loader_config();
    loader_config.redundant |= redundant;
    if let Some(words) = words {
        loader_config.program_words = words;
    }
    loader_config
        .validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let flash = load_flash(image, &loader_config)?;

    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);
    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open {port_name}"))?;

    let mut loader = Loader::new(StreamTransport::new(port), flash, loader_config)?;

    if !cli.quiet {
        eprintln!(
            "{} Emulating a loader on {port_name} at {baud} baud ({} words, loader at 0x{:06X}..=0x{:06X})",
            style("🔌").cyan(),
            loader_config.program_words,
            loader_config.region.start,
            loader_config.region.end
        );
        eprintln!("{}", style("Press Ctrl-C to stop").dim());
    }

    // Every reset ends a session; the emulated device re-enters the loader
    loop {
        let mut reset = || -> hexboot::Result<()> {
            info!("Device reset requested");
            Ok(())
        };
        match loader.run(&mut reset) {
            Ok(stats) => {
                if let Some(path) = image {
                    save_flash(path, loader.flash())?;
                    info!("Saved flash image to {}", path.display());
                }
                if !cli.quiet {
                    print_stats(&stats);
                }
            },
            Err(hexboot::Error::Interrupted) => {
                // Keep whatever was programmed before the interruption
                if let Some(path) = image {
                    save_flash(path, loader.flash())?;
                }
                return Err(CliError::Cancelled("Emulation stopped".to_string()).into());
            },
            Err(e) => return Err(anyhow::Error::new(e).context("Loader session failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexboot::FlashGeometry;
    use tempfile::tempdir;

    fn small_config() -> LoaderConfig {
        LoaderConfig {
            geometry: FlashGeometry::new(64, 16),
            region: hexboot::LoaderRegion::new(0x0300, 0x03FF),
            program_words: 0x0400,
            redundant: false,
        }
    }

    #[test]
    fn test_load_flash_without_file_is_blank() {
        let flash = load_flash(None, &small_config()).unwrap();
        assert_eq!(flash.words(), 0x0400);
        assert!(flash.image().iter().all(|b| *b == BLANK));
    }

    #[test]
    fn test_load_flash_missing_file_is_blank() {
        let dir = tempdir().unwrap();
        let flash = load_flash(Some(&dir.path().join("none.bin")), &small_config()).unwrap();
        assert_eq!(flash.image().len(), 0x0800);
    }

    #[test]
    fn test_load_flash_pads_short_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        fs::write(&path, [0x12, 0x34]).unwrap();

        let flash = load_flash(Some(&path), &small_config()).unwrap();
        assert_eq!(flash.bytes(0, 4), &[0x12, 0x34, BLANK, BLANK]);
        assert_eq!(flash.image().len(), 0x0800);
    }

    #[test]
    fn test_load_flash_rejects_oversized_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        fs::write(&path, vec![0u8; 0x0802]).unwrap();

        assert!(load_flash(Some(&path), &small_config()).is_err());
    }

    #[test]
    fn test_save_then_load_keeps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flash.bin");
        let mut image = vec![BLANK; 0x0800];
        image[0x40] = 0xA5;
        save_flash(&path, &SimFlash::from_image(image, small_config().geometry)).unwrap();

        let flash = load_flash(Some(&path), &small_config()).unwrap();
        assert_eq!(flash.bytes(0x20, 1), &[0xA5]);
    }
}
