#[macro_use]
extern crate clap;

use byteorder::WriteBytesExt;
use clap::Arg;
use log::info;
use masm::pseudo::PseudoOpTable;
use masm::AssembleOptions;
use mimage::SourceMapEntry;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use util::Endian;

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Masm(masm::Error),
    Io(std::io::Error, IOErrorContext, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => writeln!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "Reading input",
                    IOErrorContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Masm(err) => writeln!(f, "{}", err),
        }
    }
}

fn main() {
    env_logger::init();

    // Parse command line arguments
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the image file to write to"),
        )
        .arg(
            Arg::with_name("source_map")
                .short("m")
                .long("source_map")
                .takes_value(true)
                .value_name("SOURCE_MAP")
                .help("Sets the file to write the source map to"),
        )
        .arg(
            Arg::with_name("pseudo_ops")
                .short("p")
                .long("pseudo-ops")
                .takes_value(true)
                .value_name("CATALOG")
                .help("Overrides the pseudo-op catalog (text or .json)"),
        )
        .arg(
            Arg::with_name("no_pseudo")
                .long("no-pseudo")
                .help("Disables pseudo-instruction expansion"),
        )
        .arg(
            Arg::with_name("no_delayed_branching")
                .long("no-delayed-branching")
                .help("Expands branch pseudo-ops without delay slots"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output");
    let map = matches.value_of("source_map");
    let catalog = matches.value_of("pseudo_ops");
    let no_pseudo = matches.is_present("no_pseudo");
    let no_delay = matches.is_present("no_delayed_branching");

    if let Err(err) = masm_main(input, output, map, catalog, no_pseudo, no_delay) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn read_text(path: &Path) -> Result<String, Error> {
    let file = File::open(path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, path.to_owned()))?;
    let mut reader = BufReader::new(file);
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, path.to_owned()))?;
    Ok(text)
}

fn masm_main(
    input: &str,
    output: Option<&str>,
    map: Option<&str>,
    catalog: Option<&str>,
    no_pseudo: bool,
    no_delay: bool,
) -> Result<(), Error> {
    let input_path = Path::new(input);

    if let Some(catalog_path) = catalog {
        let path = Path::new(catalog_path);
        let text = read_text(path)?;
        let user = if path.extension().map(|e| e == "json").unwrap_or(false) {
            PseudoOpTable::parse_json(&text)
        } else {
            PseudoOpTable::parse_text(&text)
        }
        .map_err(Error::Masm)?;
        let mut table = PseudoOpTable::bundled();
        table.merge_overrides(user);
        masm::pseudo::install(table);
        info!("installed pseudo-op override from {}", catalog_path);
    }

    let source = read_text(input_path)?;

    let options = AssembleOptions {
        base_dir: input_path.parent().map(Path::to_path_buf),
        source_name: input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        include_resolver: Some(Box::new(|path: &Path| std::fs::read_to_string(path))),
        enable_pseudo_instructions: !no_pseudo,
        delayed_branching_enabled: !no_delay,
        pseudo_ops: None,
    };

    let image = masm::assemble_with(&source, &options).map_err(Error::Masm)?;
    info!(
        "assembled {} text words, {} data bytes",
        image.text.len(),
        image.data.len()
    );

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("mimg"));

    mimage::write_file(&output_path, &image)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path))?;

    if let Some(map_path_str) = map {
        let map_path = PathBuf::from(map_path_str);
        write_source_map(&image.source_map[..], &map_path)
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, map_path))?;
    }
    Ok(())
}

fn segment_code(entry: &SourceMapEntry) -> u8 {
    match entry.segment {
        mips::Segment::Text => 0,
        mips::Segment::Data => 1,
        mips::Segment::KText => 2,
        mips::Segment::KData => 3,
    }
}

fn write_source_map(source_map: &[SourceMapEntry], path: &PathBuf) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for entry in source_map.iter() {
        writer.write_u32::<Endian>(entry.address)?;
        writer.write_u32::<Endian>(entry.line)?;
        writer.write_u8(segment_code(entry))?;
        writer.write_u32::<Endian>(entry.segment_index as u32)?;
    }
    Ok(())
}
