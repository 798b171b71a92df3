use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use common::{cfg, dsv};
use rom::nds::RomPacker;

/// Produce a ROM image from sources.
#[derive(clap::Args)]
pub struct Args {
    /// Build configuration (INI).
    config: PathBuf,

    /// Filesystem listing (CSV): one `source,target` record per packed
    /// file.
    filesys: PathBuf,

    /// Change to this directory before loading any packed files.
    #[arg(short = 'C', long = "directory")]
    directory: Option<PathBuf>,

    /// Write the output ROM to this file.
    #[arg(short, long, default_value = "rom.nds")]
    output: PathBuf,

    /// Do not create an output ROM; emit the computed artifacts instead:
    /// the ROM's header, banner, and filesystem tables.
    #[arg(long)]
    dry_run: bool,
}

pub fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load(&args.config)?;
    let filesys = load(&args.filesys)?;

    // The output file is anchored before any directory change; the packed
    // files named by the inputs resolve after it.
    let output = if args.dry_run {
        None
    } else {
        let file = File::create(&args.output)
            .map_err(|err| format!("could not open output file \"{}\": {}", args.output.display(), err))?;
        Some(file)
    };

    if let Some(directory) = &args.directory {
        std::env::set_current_dir(directory)
            .map_err(|err| format!("could not change to directory \"{}\": {}", directory.display(), err))?;
    }

    let mut packer = RomPacker::new();
    cfg::parse(&config, &RomPacker::SECTIONS, |ev| packer.configure(&ev))?;
    dsv::csv(&filesys, |record, line| packer.add_file(record, line))?;
    packer.seal()?;

    match output {
        None => {
            fs::write("header.sbin", packer.header())?;
            fs::write("banner.sbin", packer.banner())?;
            fs::write("fntb.sbin", packer.fntb())?;
            fs::write("fatb.sbin", packer.fatb())?;
        }
        Some(file) => {
            let mut sink = BufWriter::new(file);
            packer.dump(&mut sink)?;
            sink.flush()?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|err| format!("could not load input file \"{}\": {}", path.display(), err))
}
