//! Final result files: per-transcript abundances and library-format
//! diagnostics.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Error;
use crate::library::{LibraryFormat, ReadOrientation, ReadStrandedness, MAX_FORMAT_ID};
use crate::quant::session::ReadExperiment;

/// Write `quant.sf`: tab-separated `Name  Length  TPM  NumReads`.
///
/// TPM normalizes each transcript's accumulated mass by its length and
/// rescales so the column sums to one million; NumReads distributes the
/// total assigned fragments proportionally to mass.
pub fn write_abundances(experiment: &ReadExperiment, path: &Path) -> Result<(), Error> {
    let transcripts = experiment.transcripts();

    let masses: Vec<f64> = transcripts.iter().map(|t| t.mass().exp()).collect();
    let mass_total: f64 = masses.iter().sum();
    let tau: Vec<f64> = transcripts
        .iter()
        .zip(&masses)
        .map(|(t, &m)| m / f64::from(t.length.max(1)))
        .collect();
    let tau_total: f64 = tau.iter().sum();
    let total_assigned = experiment.total_assigned_fragments() as f64;

    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    let werr = |e| Error::io(e, path);

    writeln!(out, "Name\tLength\tTPM\tNumReads").map_err(werr)?;
    for (i, t) in transcripts.iter().enumerate() {
        let tpm = if tau_total > 0.0 {
            1.0e6 * tau[i] / tau_total
        } else {
            0.0
        };
        let num_reads = if mass_total > 0.0 {
            total_assigned * masses[i] / mass_total
        } else {
            0.0
        };
        writeln!(out, "{}\t{}\t{:.6}\t{:.3}", t.name, t.length, tpm, num_reads).map_err(werr)?;
    }
    out.flush().map_err(werr)?;
    Ok(())
}

/// The two stranded variants an unstranded protocol may produce.
fn unstranded_variants(fmt: LibraryFormat) -> (LibraryFormat, LibraryFormat) {
    let strands = match fmt.orientation {
        ReadOrientation::Same | ReadOrientation::None => {
            (ReadStrandedness::S, ReadStrandedness::A)
        }
        ReadOrientation::Away | ReadOrientation::Toward => {
            (ReadStrandedness::AS, ReadStrandedness::SA)
        }
    };
    (
        LibraryFormat::new(fmt.read_type, fmt.orientation, strands.0),
        LibraryFormat::new(fmt.read_type, fmt.orientation, strands.1),
    )
}

/// Write `libFormatCounts.txt`: per library, the number of alignments
/// consistent and inconsistent with the declared format, plus the full
/// per-format breakdown.
pub fn write_lib_format_counts(experiment: &ReadExperiment, path: &Path) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    let werr = |e| Error::io(e, path);

    for lib in experiment.libraries() {
        let fmt = lib.format;
        let counts = lib.lib_type_counts();

        let (num_agree, num_disagree) = if fmt.strandedness == ReadStrandedness::U {
            // Unstranded protocols should see both strandings about
            // equally; either counts as consistent.
            let (fmt1, fmt2) = unstranded_variants(fmt);
            let n1 = counts[fmt1.format_id() as usize];
            let n2 = counts[fmt2.format_id() as usize];
            let disagree: u64 = counts
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != fmt1.format_id() as usize && i != fmt2.format_id() as usize)
                .map(|(_, &c)| c)
                .sum();

            if n1 + n2 > 0 {
                let ratio = n1 as f64 / (n1 + n2) as f64;
                if (ratio - 0.5).abs() > 0.01 {
                    log::warn!(
                        "detected a strand bias > 1% in an unstranded protocol for \
                         library [{}]; see {} for details",
                        lib.read_files_string(),
                        path.display()
                    );
                }
            }
            (n1 + n2, disagree)
        } else {
            let agree = counts[fmt.format_id() as usize];
            let disagree = counts.iter().sum::<u64>() - agree;
            (agree, disagree)
        };

        if num_agree + num_disagree > 0 {
            let disagree_ratio = num_disagree as f64 / (num_agree + num_disagree) as f64;
            if disagree_ratio > 0.05 {
                log::warn!(
                    "more than 5% of alignments disagreed with the declared library \
                     type for [{}]",
                    lib.read_files_string()
                );
            }
        }

        writeln!(out, "========").map_err(werr)?;
        writeln!(
            out,
            "Read library consisting of files: {}",
            lib.read_files_string()
        )
        .map_err(werr)?;
        writeln!(out, "Expected format: {}", fmt).map_err(werr)?;
        writeln!(out, "# of consistent alignments: {}", num_agree).map_err(werr)?;
        writeln!(out, "# of inconsistent alignments: {}", num_disagree).map_err(werr)?;
        writeln!(out, "---- counts for each format type ----").map_err(werr)?;
        for id in 0..=MAX_FORMAT_ID {
            if let Some(f) = LibraryFormat::from_id(id) {
                let c = counts[id as usize];
                if c > 0 {
                    writeln!(out, "{} : {}", f, c).map_err(werr)?;
                }
            }
        }
        writeln!(out, "========").map_err(werr)?;
    }

    out.flush().map_err(werr)?;
    Ok(())
}
