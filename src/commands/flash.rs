//! Flash programming commands

use std::fs;
use std::path::Path;

use esploader_loader::{Loader, ProgressCallbacks, SpiPins};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar adapter for flash writes
struct Bar {
    bar: Option<ProgressBar>,
}

impl Bar {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgressCallbacks for Bar {
    fn init(&mut self, addr: u32, total: usize) {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{wide_bar}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap()
            .progress_chars("=> "),
        );
        bar.set_message(format!("0x{:08X}", addr));
        self.bar = Some(bar);
    }

    fn update(&mut self, current: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(current as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

/// Write a file to flash, verify it, and leave the chip running
pub fn write(
    loader: &mut Loader,
    address: u32,
    file: &Path,
    spi_connection: Option<SpiPins>,
    verify: bool,
    reset_after: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(file)?;
    if data.is_empty() {
        return Err(format!("{} is empty, nothing to write", file.display()).into());
    }

    loader.flash_spi_attach(spi_connection)?;

    let mut bar = Bar::new();
    loader.write_flash(address, &data, Some(&mut bar))?;

    if verify {
        loader.check_flash_md5(address, &data)?;
        println!("Hash of data verified.");
    }

    loader.flash_end(false)?;
    if reset_after {
        loader.hard_reset()?;
        println!("Hard resetting via RTS pin...");
    }
    Ok(())
}

/// Erase the whole flash
pub fn erase(loader: &mut Loader) -> Result<(), Box<dyn std::error::Error>> {
    loader.flash_spi_attach(None)?;
    loader.erase_flash()?;
    println!("Chip erase completed.");
    Ok(())
}
