//! CLI driver for reading, writing, and erasing flash over the BSL protocol, and for unpacking
//! stone images, mirroring the reference `uniflash`/`stoned` tools' three operating modes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use unisoc_bfl::profiles::{self, FdlOverrides};
use unisoc_bfl::session::{Session, SessionConfig, FLASH_BASE_ADDR_OLD};
use unisoc_bfl::stone;
use unisoc_bfl::transport::UsbTransport;

#[derive(Parser)]
#[command(author, version, about = "Unisoc/Spreadtrum BSL flasher and stone image unpacker")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the device vendor ID.
    #[arg(long, global = true, value_parser = parse_hex_u16, default_value = "0x1782")]
    device_vid: u16,

    /// Override the device product ID.
    #[arg(long, global = true, value_parser = parse_hex_u16, default_value = "0x4d00")]
    device_pid: u16,
}

#[derive(Subcommand)]
enum Command {
    /// Write a file into device flash.
    Flash(FlashArgs),
    /// Read a partition out of device flash into a file.
    Dump(DumpArgs),
    /// Unpack a stone image into its component artifacts.
    StoneUnpack(StoneUnpackArgs),
}

#[derive(clap::Args)]
struct FdlArgs {
    /// Preinstalled target profile name (overridable with individual FDL parameters).
    #[arg(short = 't', long, default_value = "sc6531efm_generic")]
    target: String,
    /// Directory to scan for target profiles.
    #[arg(long, default_value = "fdls")]
    fdl_dir: PathBuf,
    #[arg(long)]
    fdl1_file: Option<PathBuf>,
    #[arg(long, value_parser = parse_hex_u32)]
    fdl1_addr: Option<u32>,
    #[arg(long)]
    fdl2_file: Option<PathBuf>,
    #[arg(long, value_parser = parse_hex_u32)]
    fdl2_addr: Option<u32>,
    #[arg(long)]
    single_fdl_file: Option<PathBuf>,
    #[arg(long, value_parser = parse_hex_u32)]
    single_fdl_addr: Option<u32>,
}

impl FdlArgs {
    fn overrides(&self) -> FdlOverrides {
        FdlOverrides {
            fdl1_file: self.fdl1_file.clone(),
            fdl1_addr: self.fdl1_addr,
            fdl2_file: self.fdl2_file.clone(),
            fdl2_addr: self.fdl2_addr,
            single_fdl_file: self.single_fdl_file.clone(),
            single_fdl_addr: self.single_fdl_addr,
        }
    }
}

#[derive(clap::Args)]
struct FlashArgs {
    /// File to write into flash.
    file: PathBuf,
    #[command(flatten)]
    fdl: FdlArgs,
    /// Start offset in flash memory.
    #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
    start: u32,
    /// Readback/write block size, in bytes.
    #[arg(long = "block-size", default_value = "4096")]
    block_size: usize,
    /// Disable flash base address remapping.
    #[arg(short = 'n', long = "flash-noremap")]
    flash_noremap: bool,
    /// Erase the target flash region before writing.
    #[arg(short = 'e', long = "force-erase")]
    force_erase: bool,
    /// Send the write-flash-enable command before flashing.
    #[arg(long = "enable-write-flash")]
    enable_write_flash: bool,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// File to write the dumped partition contents into.
    file: PathBuf,
    #[command(flatten)]
    fdl: FdlArgs,
    /// Partition ID to read from.
    #[arg(short, long, value_parser = parse_hex_u32, default_value = "0x80000003")]
    partid: u32,
    /// Start position within the partition.
    #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
    start: u32,
    /// Number of bytes to read.
    #[arg(short, long, value_parser = parse_hex_u32, default_value = "0x400000")]
    length: u32,
    #[arg(long = "block-size", default_value = "4096")]
    block_size: usize,
}

#[derive(clap::Args)]
struct StoneUnpackArgs {
    /// Stone image file to unpack.
    file: PathBuf,
    /// Directory to write component files into (defaults next to the source file).
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn resolve_session_config(cli: &Cli, fdl: &FdlArgs, flash_noremap: bool) -> SessionConfig {
    let flash_base = if flash_noremap {
        0
    } else if fdl.target.starts_with("sc6530") {
        FLASH_BASE_ADDR_OLD
    } else {
        SessionConfig::default().flash_base
    };
    SessionConfig {
        vid: cli.device_vid,
        pid: cli.device_pid,
        flash_base,
        flash_noremap,
        ..SessionConfig::default()
    }
}

fn boot_device(cli: &Cli, fdl: &FdlArgs, config: SessionConfig) -> Result<Session<UsbTransport>> {
    let plan = profiles::resolve(&fdl.fdl_dir, &fdl.target, &fdl.overrides())
        .context("resolving FDL profile")?;

    info!("connect the device {:#06x}:{:#06x} while holding the boot key...", cli.device_vid, cli.device_pid);
    let transport = UsbTransport::open(cli.device_vid, cli.device_pid).context("opening USB device")?;
    let mut session = Session::new(transport, config);

    let fdl1_bytes = std::fs::read(&plan.fdl1().path)
        .with_context(|| format!("reading {:?}", plan.fdl1().path))?;
    info!("loading FDL1 from {:?} to {:#010x}", plan.fdl1().path, plan.fdl1().addr);
    session.boot_fdl1(plan.fdl1().addr, &fdl1_bytes).context("running FDL1")?;

    if plan.is_single() {
        session.finalize_single_fdl().context("finalizing single-FDL session")?;
    } else if let profiles::FdlPlan::Pair { fdl2, .. } = &plan {
        let fdl2_bytes = std::fs::read(&fdl2.path).with_context(|| format!("reading {:?}", fdl2.path))?;
        info!("loading FDL2 from {:?} to {:#010x}", fdl2.path, fdl2.addr);
        session.boot_fdl2(fdl2.addr, &fdl2_bytes, 1024).context("running FDL2")?;
    }

    info!("FDL running, ready to interact with flash memory");
    Ok(session)
}

fn run_flash(cli: &Cli, args: &FlashArgs) -> Result<()> {
    let config = resolve_session_config(cli, &args.fdl, args.flash_noremap);
    let mut session = boot_device(cli, &args.fdl, config)?;

    if args.enable_write_flash {
        session.enable_write_flash().context("enabling flash write")?;
    }

    let data = std::fs::read(&args.file).with_context(|| format!("reading {:?}", args.file))?;
    info!("writing flash at offset {:#010x} from {:?}...", args.start, args.file);
    session
        .write_flash(args.start, &data, args.block_size, args.force_erase)
        .context("writing flash")?;
    info!("flash memory written, disconnect the device!");
    Ok(())
}

fn run_dump(cli: &Cli, args: &DumpArgs) -> Result<()> {
    let config = resolve_session_config(cli, &args.fdl, false);
    let mut session = boot_device(cli, &args.fdl, config)?;
    info!(
        "dumping {} bytes from partition {:#010x} at offset {:#010x} to {:?}...",
        args.length, args.partid, args.start, args.file
    );
    let data = session
        .read_partition(args.partid, args.length, args.start, args.block_size)
        .context("reading partition")?;
    std::fs::write(&args.file, &data).with_context(|| format!("writing {:?}", args.file))?;
    session.reset().context("resetting device")?;
    info!("partition dumped!");
    Ok(())
}

fn run_stone_unpack(args: &StoneUnpackArgs) -> Result<()> {
    let data = std::fs::read(&args.file).with_context(|| format!("reading {:?}", args.file))?;
    let out_dir = args
        .directory
        .clone()
        .or_else(|| args.file.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)?;

    info!("unpacking {:?} to {:?}", args.file, out_dir);
    let artifacts = stone::unpack_stone(&data).context("unpacking stone image")?;
    for artifact in artifacts {
        let path = out_dir.join(&artifact.name);
        std::fs::write(&path, &artifact.data).with_context(|| format!("writing {path:?}"))?;
        info!("wrote {path:?} ({} bytes)", artifact.data.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Flash(args) => run_flash(&cli, args),
        Command::Dump(args) => run_dump(&cli, args),
        Command::StoneUnpack(args) => run_stone_unpack(args),
    }
}
