use std::path::PathBuf;

#[macro_use]
extern crate log;

use anyhow::{anyhow, Context};
use indicatif::{ProgressBar, ProgressStyle};
use simplelog::{Config, LevelFilter, SimpleLogger};
use structopt::StructOpt;

use mboot_uart_loader::{Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    #[structopt(subcommand)]
    operation: Operation,

    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "57600")]
    baud: usize,

    /// Use the device maximum packet size for data transfers
    #[structopt(long)]
    negotiate_packet_size: bool,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Check the bootloader is listening
    Ping,

    /// Fetch a bootloader property by tag
    GetProperty {
        #[structopt(parse(try_from_str = parse_u32))]
        tag: u32,

        /// Memory or peripheral index
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        index: u32,
    },

    /// Set a writable bootloader property
    SetProperty {
        #[structopt(parse(try_from_str = parse_u32))]
        tag: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        value: u32,
    },

    /// Erase all flash
    FlashEraseAll {
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        memory_id: u32,
    },

    /// Erase a flash region
    FlashEraseRegion {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        length: u32,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        memory_id: u32,
    },

    /// Fill memory with a 32-bit pattern
    FillMemory {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        length: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        pattern: u32,
    },

    /// Write a file or hex string to memory
    WriteMemory {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        /// Binary file to write
        #[structopt(long, conflicts_with = "hex")]
        file: Option<PathBuf>,

        /// Hex encoded data to write
        #[structopt(long)]
        hex: Option<String>,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        memory_id: u32,
    },

    /// Read memory to a file, or print it as hex
    ReadMemory {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        length: u32,

        /// File to write read data to
        #[structopt(long)]
        file: Option<PathBuf>,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        memory_id: u32,
    },

    /// Erase all flash and clear flash security
    FlashEraseAllUnsecure,

    /// Stream a secure binary image to the bootloader
    ReceiveSbFile {
        file: PathBuf,
    },

    /// Call a function, returning to the bootloader
    Call {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        argument: u32,
    },

    /// Jump to an application entry point
    Execute {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        argument: u32,

        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        stack_pointer: u32,
    },

    /// Configure external memory from a configuration block in RAM
    ConfigureMemory {
        #[structopt(parse(try_from_str = parse_u32))]
        memory_id: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
    },

    /// Read a program-once word
    FlashReadOnce {
        #[structopt(parse(try_from_str = parse_u32))]
        index: u32,

        #[structopt(long, default_value = "4", parse(try_from_str = parse_u32))]
        count: u32,
    },

    /// Program a program-once word
    FlashProgramOnce {
        #[structopt(parse(try_from_str = parse_u32))]
        index: u32,

        #[structopt(parse(try_from_str = parse_u32))]
        data: u32,

        #[structopt(long, default_value = "4", parse(try_from_str = parse_u32))]
        count: u32,

        /// Skip reading the word back
        #[structopt(long)]
        no_verify: bool,
    },

    /// Reset the device
    Reset,
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .progress_chars("=> "),
    );
    pb
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Connecting to serial port");

    let mut p = Programmer::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    if !matches!(o.operation, Operation::Ping) {
        info!("Connecting to bootloader");
        p.init().context("Error connecting to bootloader")?;
    }

    if o.negotiate_packet_size {
        let size = p.negotiate_packet_size()?;
        info!("Using {} byte data packets", size);
    }

    match o.operation {
        Operation::Ping => {
            let r = p.ping()?;
            info!("Bootloader protocol {} (options 0x{:04x})", r.version, r.options);
        }
        Operation::GetProperty { tag, index } => {
            let v = p.get_property(tag, index)?;
            match v.version() {
                Some(version) => info!("Property 0x{:02x}: {}", tag, version),
                None => info!("Property 0x{:02x}: {:08x?}", tag, v.words),
            }
        }
        Operation::SetProperty { tag, value } => {
            p.set_property(tag, value)?;
            info!("Property 0x{:02x} set to 0x{:08x}", tag, value);
        }
        Operation::FlashEraseAll { memory_id } => {
            info!("Erasing flash");
            p.flash_erase_all(memory_id)?;
            info!("Erase complete");
        }
        Operation::FlashEraseRegion {
            address,
            length,
            memory_id,
        } => {
            info!("Erasing {} at 0x{:08x}", bytefmt::format(length as u64), address);
            p.flash_erase_region(address, length, memory_id)?;
            info!("Erase complete");
        }
        Operation::FillMemory {
            address,
            length,
            pattern,
        } => {
            p.fill_memory(address, length, pattern)?;
            info!("Filled {} at 0x{:08x}", bytefmt::format(length as u64), address);
        }
        Operation::WriteMemory {
            address,
            file,
            hex,
            memory_id,
        } => {
            let data = match (file, hex) {
                (Some(f), None) => std::fs::read(&f)
                    .with_context(|| format!("Error reading file {}", f.display()))?,
                (None, Some(h)) => hex::decode(h.trim_start_matches("0x"))?,
                _ => return Err(anyhow!("One of --file or --hex is required")),
            };

            info!("Writing {} to 0x{:08x}", bytefmt::format(data.len() as u64), address);

            let pb = progress_bar(data.len());
            let bar = pb.clone();
            p.set_progress(move |done, _total| bar.set_position(done as u64));

            p.write_memory(address, memory_id, &data)?;

            pb.finish_and_clear();
            info!("Write complete");
        }
        Operation::ReadMemory {
            address,
            length,
            file,
            memory_id,
        } => {
            info!("Reading {} from 0x{:08x}", bytefmt::format(length as u64), address);

            let pb = progress_bar(length as usize);
            let bar = pb.clone();
            p.set_progress(move |done, _total| bar.set_position(done as u64));

            let data = p.read_memory(address, length, memory_id)?;
            pb.finish_and_clear();

            match file {
                Some(f) => {
                    std::fs::write(&f, &data)
                        .with_context(|| format!("Error writing file {}", f.display()))?;
                    info!("Wrote {} to {}", bytefmt::format(data.len() as u64), f.display());
                }
                None => println!("{}", hex::encode(&data)),
            }
        }
        Operation::FlashEraseAllUnsecure => {
            info!("Erasing flash and clearing security");
            p.flash_erase_all_unsecure()?;
            info!("Erase complete");
        }
        Operation::ReceiveSbFile { file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Error reading file {}", file.display()))?;

            info!("Sending {} SB file", bytefmt::format(data.len() as u64));

            let pb = progress_bar(data.len());
            let bar = pb.clone();
            p.set_progress(move |done, _total| bar.set_position(done as u64));

            p.receive_sb_file(&data)?;

            pb.finish_and_clear();
            info!("SB file processed");
        }
        Operation::Call { address, argument } => {
            p.call(address, argument)?;
            info!("Called 0x{:08x}", address);
        }
        Operation::Execute {
            address,
            argument,
            stack_pointer,
        } => {
            p.execute(address, argument, stack_pointer)?;
            info!("Executing from 0x{:08x}", address);
        }
        Operation::ConfigureMemory { memory_id, address } => {
            p.configure_memory(memory_id, address)?;
            info!("Memory {} configured", memory_id);
        }
        Operation::FlashReadOnce { index, count } => {
            let v = p.flash_read_once(index, count)?;
            info!("OTP 0x{:02x}: 0x{:08x}", index, v);
        }
        Operation::FlashProgramOnce {
            index,
            data,
            count,
            no_verify,
        } => {
            p.flash_program_once(index, count, data, !no_verify)?;
            info!("OTP 0x{:02x} programmed", index);
        }
        Operation::Reset => {
            p.reset()?;
            info!("Device reset");
        }
    }

    Ok(())
}
