//! The `info` command

use esploader_loader::Loader;

/// Print what we know about the connected chip
pub fn run(loader: &mut Loader) -> Result<(), Box<dyn std::error::Error>> {
    println!("Chip:            {}", loader.chip_description());
    println!("Features:        {}", loader.feature_tags().join(", "));
    println!("Crystal:         {}", loader.crystal_freq());
    println!("Chip id:         {}", loader.chip().image_chip_id);
    println!("UF2 family id:   0x{:08X}", loader.chip().uf2_family_id);

    if loader.secure_download_mode() {
        println!("Security:        secure download mode is ACTIVE");
    } else if let Some(magic) = loader.capability_cache().chip_magic {
        println!("Boot ROM magic:  0x{:08X}", magic);
    }

    let info = loader.get_security_info()?;
    println!("Security flags:  0x{:08X}", info.flags);
    println!("ROM API version: {}", info.api_version);
    Ok(())
}
