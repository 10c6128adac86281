//! dscsym - inspect the dyld shared cache of the running system.
//!
//! The shared cache is mapped at the same slid address in every process
//! since boot, so addresses printed here are valid in other processes too.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use dscsym::dyld::uuid_to_string;
use dscsym::util::parse_address;
use dscsym::{
    locate_runtime_cache, ResolverOptions, RuntimeAddr, SharedCacheContext, SystemPlatform,
    UnslidAddr,
};

/// Resolve private symbols of images in the dyld shared cache.
#[derive(Parser, Debug)]
#[command(name = "dscsym")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dyld shared cache file.
    /// If not specified, asks dyld and then probes the default location.
    #[arg(short, long, global = true)]
    cache: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the runtime cache, its slide, mappings and local symbols
    Info,

    /// Check whether an address range lies inside the shared cache
    Contains {
        /// Start address (hex, e.g., 0x1a0004000)
        address: String,

        /// Length of the range in bytes
        #[arg(short, long, default_value = "1")]
        length: u64,
    },

    /// List the local symbols of a cached image
    Symbols {
        /// Address of the image's mach header in this process (hex)
        image: String,

        /// Only show symbols whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,

        /// Include debugging (stab) entries
        #[arg(long)]
        stabs: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut options = ResolverOptions::default();
    if let Some(path) = cli.cache {
        options = options.with_cache_path(path);
    }

    match cli.command {
        Commands::Info => cmd_info(&options),
        Commands::Contains { address, length } => cmd_contains(&address, length),
        Commands::Symbols {
            image,
            filter,
            stabs,
        } => cmd_symbols(&options, &image, filter.as_deref(), stabs),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn parse_addr_arg(text: &str) -> Result<u64> {
    parse_address(text).ok_or_else(|| anyhow!("invalid address: {text}"))
}

fn cmd_info(options: &ResolverOptions) -> Result<()> {
    let Some(runtime) = locate_runtime_cache() else {
        bail!("no dyld shared cache is mapped into this process");
    };

    let header = runtime.header();
    println!("Runtime base:  {}", runtime.base());
    println!("Architecture:  {}", header.architecture());
    println!("UUID:          {}", uuid_to_string(runtime.uuid()));
    println!("Slide:         {}", runtime.slide());
    println!();

    println!("Mappings ({}):", runtime.mappings().len());
    let slide = runtime.slide();
    for mapping in runtime.mappings() {
        println!(
            "  {:#x}-{:#x} -> {}  size {:#x}  {}",
            mapping.address,
            mapping.end(),
            slide.slide(UnslidAddr(mapping.address)),
            mapping.size,
            mapping.protection()
        );
    }
    println!();

    match SharedCacheContext::build(&SystemPlatform, options) {
        Ok(ctx) => {
            let info = ctx.local_symbols_info();
            println!("Cache file:    {}", ctx.path().display());
            println!("Local symbols: {} images", info.entries_count);
            println!("               {} symbols", info.nlist_count);
            println!("               {} bytes of strings", info.strings_size);
        }
        Err(e) if e.is_unsupported() => {
            println!("Local symbols: none (cache built without them)");
        }
        Err(e) => return Err(e).context("failed to map local symbols"),
    }

    Ok(())
}

fn cmd_contains(address: &str, length: u64) -> Result<()> {
    let addr = parse_addr_arg(address)?;
    let inside = dscsym::contains(addr, length);
    println!(
        "{:#x}+{:#x}: {}",
        addr,
        length,
        if inside { "in shared cache" } else { "not in shared cache" }
    );
    Ok(())
}

fn cmd_symbols(options: &ResolverOptions, image: &str, filter: Option<&str>, stabs: bool) -> Result<()> {
    let image = RuntimeAddr(parse_addr_arg(image)?);
    let ctx = dscsym::init_with(&SystemPlatform, options).context("failed to open shared cache")?;

    let symbols = match ctx.find_local_symbols(image) {
        Ok(symbols) => symbols,
        Err(e) if e.is_not_found() => {
            println!("{image}: no local symbols in the shared cache");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut shown = 0usize;
    for sym in symbols.iter() {
        if sym.nlist.is_debug() && !stabs {
            continue;
        }
        let name = String::from_utf8_lossy(sym.name);
        if filter.is_some_and(|f| !name.contains(f)) {
            continue;
        }
        println!("{}  {:#04x}  {}", sym.address, sym.nlist.n_type, name);
        shown += 1;
    }

    println!();
    println!("{} of {} local symbols", shown, symbols.len());
    Ok(())
}
