//! Register access commands

use esploader_loader::Loader;

/// Read a register and print its value
pub fn read(loader: &mut Loader, address: u32) -> Result<(), Box<dyn std::error::Error>> {
    let value = loader.read_reg(address)?;
    println!("0x{:08X} = 0x{:08X}", address, value);
    Ok(())
}

/// Write a register
pub fn write(
    loader: &mut Loader,
    address: u32,
    value: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    loader.write_reg(address, value)?;
    println!("0x{:08X} <- 0x{:08X}", address, value);
    Ok(())
}
