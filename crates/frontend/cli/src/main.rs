use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use smod_catalog::{
    seed_builtin, Catalog, CatalogStore, Category, Confidence, DiscoveryFilter, ExportBundle,
    JsonlStore, MemoryStore,
};
use smod_core::verify::{diff_bytes, Expectation, PatchCheck, VerifyStats};
use smod_core::{RomImage, RomOffset, SnesAddr};
use smod_replay::{sample_and_compare, Button, ReplaySession};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "smod", about = "SNES ROM patch & verification toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show image layout and internal header fields
    Info { rom: PathBuf },

    /// Check the header checksum pair, optionally recompute and save
    Checksum {
        rom: PathBuf,
        /// Recompute the checksum and save in place (with backup)
        #[arg(long)]
        fix: bool,
    },

    /// Apply a named mod from the catalog and verify the byte delta
    Apply {
        rom: PathBuf,
        /// Discovery name to apply (e.g. infinite-magic)
        #[arg(long = "mod", value_name = "NAME")]
        mod_name: String,
        /// Catalog log file; defaults to the built-in seed set
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Write here instead of overwriting the input (in-place saves back up first)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Skip the checksum recompute after patching
        #[arg(long)]
        skip_checksum: bool,
        /// Console address to sample after patching, e.g. 7EF36E
        #[arg(long, value_name = "HEX")]
        runtime_addr: Option<String>,
        /// Bytes the sample must NOT equal (hex), e.g. 00
        #[arg(long, value_name = "HEX")]
        runtime_not: Option<String>,
        /// Frames to run before sampling
        #[arg(long, default_value_t = 600)]
        runtime_frames: u32,
        /// Emulator binary for runtime checks
        #[arg(long, default_value = "bsnes-cli")]
        emulator: String,
    },

    /// Inspect or move the discovery catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Replay an input history and dump emulated memory
    Probe {
        rom: PathBuf,
        /// Console address to read, e.g. 7EF360
        #[arg(long, value_name = "HEX")]
        addr: String,
        #[arg(long, default_value_t = 1)]
        size: usize,
        /// History steps in order: wait:N, press:BTN, hold:BTN:N
        #[arg(long = "step", value_name = "STEP")]
        steps: Vec<String>,
        /// Bytes the sample must equal (hex); mismatch exits non-zero
        #[arg(long, value_name = "HEX")]
        expect: Option<String>,
        #[arg(long, default_value = "bsnes-cli")]
        emulator: String,
        /// Emulator timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Create a catalog file populated with the built-in Zelda 3 set
    Seed {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// List discoveries, optionally filtered
    List {
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_name = "LEVEL")]
        min_confidence: Option<String>,
        #[arg(long)]
        validated: bool,
        #[arg(long, value_name = "SUBSTR")]
        name: Option<String>,
        /// Print full records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the latest version of one discovery
    Show {
        name: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Write a versioned bundle with computed statistics
    Export {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Replay a bundle into a fresh catalog file
    Import {
        bundle: PathBuf,
        #[arg(long)]
        catalog: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Info { rom } => info(&rom),
        Command::Checksum { rom, fix } => checksum(&rom, fix),
        Command::Apply {
            rom,
            mod_name,
            catalog,
            output,
            skip_checksum,
            runtime_addr,
            runtime_not,
            runtime_frames,
            emulator,
        } => apply(
            &rom,
            &mod_name,
            catalog.as_deref(),
            output.as_deref(),
            skip_checksum,
            runtime_addr.as_deref(),
            runtime_not.as_deref(),
            runtime_frames,
            &emulator,
        ),
        Command::Catalog { action } => catalog_action(action),
        Command::Probe {
            rom,
            addr,
            size,
            steps,
            expect,
            emulator,
            timeout,
        } => probe(
            &rom,
            &addr,
            size,
            &steps,
            expect.as_deref(),
            &emulator,
            timeout,
        ),
    }
}

fn parse_hex(s: &str) -> Result<u32> {
    let trimmed = s
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('$');
    u32::from_str_radix(trimmed, 16).with_context(|| format!("invalid hex value {:?}", s))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 {
        bail!("hex byte string {:?} has an odd number of digits", s);
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte in {:?}", s))
        })
        .collect()
}

fn hex_dump(base: u32, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:06X}  {}", base + (i * 16) as u32, hex.join(" "));
    }
}

/// Open a persistent catalog, or fall back to an in-memory copy of the
/// built-in seed set when no file was given.
fn open_catalog(path: Option<&std::path::Path>) -> Result<Catalog<Box<dyn CatalogStore>>> {
    match path {
        Some(p) => {
            let store: Box<dyn CatalogStore> = Box::new(JsonlStore::new(p));
            Ok(Catalog::open(store)?)
        }
        None => {
            let store: Box<dyn CatalogStore> = Box::new(MemoryStore::default());
            let mut catalog = Catalog::open(store)?;
            seed_builtin(&mut catalog)?;
            Ok(catalog)
        }
    }
}

fn info(rom: &std::path::Path) -> Result<()> {
    let image = RomImage::load(rom)?;
    let header = image.header()?;
    println!("file:          {}", rom.display());
    println!("body size:     {} KB", image.body_len() / 1024);
    println!(
        "copier header: {}",
        if image.has_copier_header() { "yes (512 bytes)" } else { "no" }
    );
    println!(
        "header at:     ${:04X} ({})",
        image.header_offset(),
        RomOffset::new(image.header_offset() as u32).to_snes()
    );
    println!("title:         {}", header.title);
    println!("mapping:       {}", header.mapping());
    println!("declared size: {} KB", header.rom_size_kib());
    println!("SRAM:          {} KB", header.sram_size_kib());
    println!(
        "checksum:      ${:04X} / complement ${:04X} ({})",
        header.checksum,
        header.complement,
        if header.checksum_pair_valid() { "consistent" } else { "INCONSISTENT" }
    );
    Ok(())
}

fn checksum(rom: &std::path::Path, fix: bool) -> Result<()> {
    let mut image = RomImage::load(rom)?;
    let header = image.header()?;
    println!(
        "stored pair: ${:04X} / ${:04X} ({})",
        header.checksum,
        header.complement,
        if image.checksum_pair_valid() { "consistent" } else { "inconsistent" }
    );
    if fix {
        let new = image.recompute_checksum();
        println!("recomputed:  ${:04X}", new);
        if image.is_dirty() {
            image.save(None)?;
            println!("saved {} (previous file backed up)", rom.display());
        } else {
            println!("checksum already correct, nothing to save");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply(
    rom: &std::path::Path,
    mod_name: &str,
    catalog_path: Option<&std::path::Path>,
    output: Option<&std::path::Path>,
    skip_checksum: bool,
    runtime_addr: Option<&str>,
    runtime_not: Option<&str>,
    runtime_frames: u32,
    emulator: &str,
) -> Result<()> {
    let mut catalog = open_catalog(catalog_path)?;
    let discovery = catalog
        .resolve(mod_name)
        .with_context(|| format!("no discovery named {:?} in the catalog", mod_name))?
        .clone();

    let offset = match discovery.rom_offset {
        Some(o) => o,
        None => bail!(
            "{:?} is a {} discovery with no ROM offset; it cannot be applied as a patch",
            mod_name,
            discovery.category
        ),
    };
    let patch = match &discovery.expected {
        Some(bytes) => bytes.clone(),
        None => bail!("{:?} has no byte pattern to apply", mod_name),
    };

    let mut image = RomImage::load(rom)?;
    let before = image.snapshot();
    image.write_range(RomOffset::new(offset), &patch)?;

    let deltas = diff_bytes(0, &before, &image.snapshot())?;
    if deltas.is_empty() {
        println!("{}: image already carries this patch", mod_name);
    }
    for delta in &deltas {
        println!("  {}", delta);
    }
    let check = PatchCheck::assess(deltas, offset, discovery.size);
    let mut stats = VerifyStats::default();
    stats.record(check.is_clean());
    if !check.is_clean() {
        // Surfaced, not fatal: the caller sees exactly which bytes strayed
        eprintln!(
            "warning: {} byte(s) changed outside the declared range",
            check.unexpected.len()
        );
    }

    if !skip_checksum {
        image.recompute_checksum();
    }
    let saved_to = image.save(output)?;
    println!(
        "applied {} ({} bytes at ${:06X}) -> {}",
        mod_name,
        discovery.size,
        offset,
        saved_to.display()
    );

    let mut verified = check.is_clean();
    if let Some(addr) = runtime_addr {
        let addr = parse_hex(addr)?;
        let reject = match runtime_not {
            Some(h) => parse_hex_bytes(h)?,
            None => vec![0u8; discovery.size as usize],
        };
        let mut session = ReplaySession::new(emulator, &saved_to);
        session.run_frames(runtime_frames);
        let expectation = Expectation::Not(reject);
        let matched = sample_and_compare(&mut session, addr, reject_len(&expectation), &expectation)?;
        println!(
            "runtime check at {}: {}",
            SnesAddr::from_packed(addr),
            if matched { "ok" } else { "MISMATCH" }
        );
        stats.record(matched);
        verified = verified && matched;
    }

    // Only a persistent catalog can keep the verification trail
    if catalog_path.is_some() {
        catalog.record_verification(discovery.id, verified)?;
    }
    println!("verification: {}", stats);
    Ok(())
}

fn reject_len(expectation: &Expectation) -> usize {
    match expectation {
        Expectation::Exact(b) | Expectation::Not(b) => b.len(),
        Expectation::AnyOf(options) => options.first().map_or(0, Vec::len),
    }
}

fn catalog_action(action: CatalogAction) -> Result<()> {
    match action {
        CatalogAction::Seed { catalog } => {
            if catalog.exists() {
                bail!("{} already exists; refusing to seed over it", catalog.display());
            }
            let mut cat = Catalog::open(JsonlStore::new(&catalog))?;
            let ids = seed_builtin(&mut cat)?;
            println!("seeded {} discoveries into {}", ids.len(), catalog.display());
            Ok(())
        }
        CatalogAction::List {
            catalog,
            category,
            min_confidence,
            validated,
            name,
            json,
        } => {
            let cat = open_catalog(catalog.as_deref())?;
            let filter = DiscoveryFilter {
                category: match category.as_deref() {
                    Some(s) => Some(
                        Category::parse(s).with_context(|| format!("unknown category {:?}", s))?,
                    ),
                    None => None,
                },
                min_confidence: match min_confidence.as_deref() {
                    Some(s) => Some(
                        Confidence::parse(s)
                            .with_context(|| format!("unknown confidence level {:?}", s))?,
                    ),
                    None => None,
                },
                validated: if validated { Some(true) } else { None },
                name_contains: name,
                include_superseded: false,
            };
            let records = cat.query(&filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for r in records {
                    let target = match (r.rom_offset, r.snes_addr) {
                        (Some(o), _) => format!("${:06X}", o),
                        (None, Some(a)) => format!("{}", SnesAddr::from_packed(a)),
                        (None, None) => "-".into(),
                    };
                    println!(
                        "#{:<4} {:24} {:8} {:12} {:9} {:>2}B  {}",
                        r.id,
                        r.name,
                        r.category.to_string(),
                        r.confidence.to_string(),
                        if r.validated { "validated" } else { "-" },
                        r.size,
                        target
                    );
                }
            }
            Ok(())
        }
        CatalogAction::Show { name, catalog } => {
            let cat = open_catalog(catalog.as_deref())?;
            let record = cat
                .resolve(&name)
                .with_context(|| format!("no discovery named {:?}", name))?;
            println!("{}", serde_json::to_string_pretty(record)?);
            Ok(())
        }
        CatalogAction::Export { catalog, output } => {
            let cat = Catalog::open(JsonlStore::new(&catalog))?;
            let bundle = ExportBundle::from_catalog(&cat);
            bundle.write(&output)?;
            println!(
                "exported {} records ({} validated) to {}",
                bundle.stats.total,
                bundle.stats.validated,
                output.display()
            );
            Ok(())
        }
        CatalogAction::Import { bundle, catalog } => {
            if catalog.exists() {
                bail!("{} already exists; refusing to import over it", catalog.display());
            }
            let bundle = ExportBundle::read(&bundle)?;
            let total = bundle.records.len();
            bundle.into_catalog(JsonlStore::new(&catalog))?;
            println!("imported {} records into {}", total, catalog.display());
            Ok(())
        }
    }
}

fn apply_step(session: &mut ReplaySession, step: &str) -> Result<()> {
    let parts: Vec<&str> = step.split(':').collect();
    match parts.as_slice() {
        ["wait", n] => session.run_frames(n.parse().context("bad wait frame count")?),
        ["press", b] => {
            let button = Button::parse(b)
                .with_context(|| format!("unknown button {:?} in step {:?}", b, step))?;
            session.press(button);
        }
        ["hold", b, n] => {
            let button = Button::parse(b)
                .with_context(|| format!("unknown button {:?} in step {:?}", b, step))?;
            let frames: u32 = n.parse().context("bad hold frame count")?;
            if frames == 0 {
                bail!("hold in step {:?} must last at least one frame", step);
            }
            session.hold(button, frames);
        }
        _ => bail!("bad step {:?} (expected wait:N, press:BTN or hold:BTN:N)", step),
    }
    Ok(())
}

fn probe(
    rom: &std::path::Path,
    addr: &str,
    size: usize,
    steps: &[String],
    expect: Option<&str>,
    emulator: &str,
    timeout: u64,
) -> Result<()> {
    let addr = parse_hex(addr)?;
    let mut session =
        ReplaySession::new(emulator, rom).with_timeout(Duration::from_secs(timeout));

    for step in steps {
        apply_step(&mut session, step)?;
    }

    let bytes = session.read_memory(addr, size)?;
    println!(
        "{} after {} frames:",
        SnesAddr::from_packed(addr),
        session.frame_count()
    );
    hex_dump(addr, &bytes);

    if let Some(expect) = expect {
        let want = parse_hex_bytes(expect)?;
        if !Expectation::Exact(want.clone()).matches(&bytes) {
            bail!(
                "expected {:02X?} but observed {:02X?}",
                want,
                bytes
            );
        }
        println!("matches expectation");
    }
    Ok(())
}
