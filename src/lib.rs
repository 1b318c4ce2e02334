#![allow(non_snake_case)]

pub mod cluster;
pub mod error;
pub mod fld;
pub mod index;
pub mod io;
pub mod library;
pub mod math;
pub mod output;
pub mod params;
pub mod quant;
pub mod transcript;

use log::info;

use crate::index::TranscriptomeIndex;
use crate::params::{Parameters, RunMode};
use crate::quant::session::{self, ReadExperiment};

/// Top-level dispatcher. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<()> {
    params.validate()?;

    info!("ruSalmon v{}", env!("CARGO_PKG_VERSION"));
    info!("runMode: {}", params.run_mode);
    info!("threads: {}", params.threads);

    match params.run_mode {
        RunMode::Index => build_index(params),
        RunMode::Quant => quantify(params),
    }
}

fn build_index(params: &Parameters) -> anyhow::Result<()> {
    info!(
        "transcripts: {:?}",
        params
            .transcripts
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    );

    info!("Building transcriptome index...");
    let index = TranscriptomeIndex::build(&params.transcripts)?;

    info!("Writing index files to {}...", params.index_dir.display());
    index.write(&params.index_dir)?;

    info!("Index generation complete!");
    Ok(())
}

fn quantify(params: &Parameters) -> anyhow::Result<()> {
    info!("index: {}", params.index_dir.display());

    let index = TranscriptomeIndex::load(&params.index_dir)?;
    let libraries = params.read_libraries()?;
    let opts = params.quant_opts();

    std::fs::create_dir_all(&params.output)
        .map_err(|e| error::Error::io(e, &params.output))?;

    let mut experiment = ReadExperiment::new(&index, libraries);
    session::quantify_library(
        &mut experiment,
        &index,
        &opts,
        &params.output,
        params.read_files_command.as_deref(),
    )?;

    info!("writing output");
    output::write_abundances(&experiment, &params.output.join("quant.sf"))?;
    output::write_lib_format_counts(&experiment, &params.output.join("libFormatCounts.txt"))?;

    info!("Quantification complete!");
    Ok(())
}
