//! Session-level tests driving the quantification pipeline through the
//! library API.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

use ruSalmon::index::TranscriptomeIndex;
use ruSalmon::params::Parameters;
use ruSalmon::quant::session::{quantify_library, ReadExperiment};

use clap::Parser;

/// Generate a pseudo-random sequence using an LCG PRNG, so transcripts are
/// repeat-free and reads map uniquely.
fn generate_seq(seed: u32, length: usize) -> String {
    let bases = ['A', 'C', 'G', 'T'];
    let mut state = seed;
    let mut seq = String::with_capacity(length);
    for _ in 0..length {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        seq.push(bases[((state >> 16) & 3) as usize]);
    }
    seq
}

fn write_fasta(dir: &TempDir, transcripts: &[(&str, &str)]) -> PathBuf {
    let path = dir.path().join("txome.fa");
    let mut file = fs::File::create(&path).unwrap();
    for (name, seq) in transcripts {
        writeln!(file, ">{name}").unwrap();
        writeln!(file, "{seq}").unwrap();
    }
    path
}

/// Single-end reads tiled across one transcript.
fn write_single_end_reads(dir: &TempDir, name: &str, source: &str, n: usize, len: usize) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = fs::File::create(&path).unwrap();
    for i in 0..n {
        let start = (i * 7) % (source.len() - len);
        writeln!(file, "@read{}", i + 1).unwrap();
        writeln!(file, "{}", &source[start..start + len]).unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "{}", "I".repeat(len)).unwrap();
    }
    path
}

fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            'T' => 'A',
            other => other,
        })
        .collect()
}

/// Paired-end fragments with a fixed inner span.
fn write_paired_end_reads(
    dir: &TempDir,
    source: &str,
    n: usize,
) -> (PathBuf, PathBuf) {
    let p1 = dir.path().join("reads_1.fq");
    let p2 = dir.path().join("reads_2.fq");
    let mut f1 = fs::File::create(&p1).unwrap();
    let mut f2 = fs::File::create(&p2).unwrap();
    let read_len = 40;
    let frag_len = 150;
    for i in 0..n {
        let start = (i * 5) % (source.len() - frag_len);
        let mate1 = &source[start..start + read_len];
        let mate2 = reverse_complement(&source[start + frag_len - read_len..start + frag_len]);
        writeln!(f1, "@frag{}/1", i + 1).unwrap();
        writeln!(f1, "{mate1}").unwrap();
        writeln!(f1, "+").unwrap();
        writeln!(f1, "{}", "I".repeat(read_len)).unwrap();
        writeln!(f2, "@frag{}/2", i + 1).unwrap();
        writeln!(f2, "{mate2}").unwrap();
        writeln!(f2, "+").unwrap();
        writeln!(f2, "{}", "I".repeat(read_len)).unwrap();
    }
    (p1, p2)
}

fn parse(args: &[&str]) -> Parameters {
    let mut full = vec!["ruSalmon"];
    full.extend_from_slice(args);
    Parameters::parse_from(full)
}

fn run_session(params: &Parameters) -> ReadExperiment {
    let index = TranscriptomeIndex::load(&params.index_dir).unwrap();
    let libraries = params.read_libraries().unwrap();
    let opts = params.quant_opts();
    fs::create_dir_all(&params.output).unwrap();
    let mut experiment = ReadExperiment::new(&index, libraries);
    quantify_library(
        &mut experiment,
        &index,
        &opts,
        &params.output,
        params.read_files_command.as_deref(),
    )
    .unwrap();
    experiment
}

fn relative_masses(experiment: &ReadExperiment) -> Vec<f64> {
    let masses: Vec<f64> = experiment
        .transcripts()
        .iter()
        .map(|t| t.mass().exp())
        .collect();
    let total: f64 = masses.iter().sum();
    masses.into_iter().map(|m| m / total).collect()
}

#[test]
fn single_end_single_pass() {
    let tmp = TempDir::new().unwrap();
    let t0 = generate_seq(12345, 500);
    let t1 = generate_seq(67890, 500);
    let fasta = write_fasta(&tmp, &[("t0", &t0), ("t1", &t1)]);
    let index_dir = tmp.path().join("index");
    TranscriptomeIndex::build(&[&fasta])
        .unwrap()
        .write(&index_dir)
        .unwrap();

    let reads = write_single_end_reads(&tmp, "reads.fq", &t0, 200, 30);
    let out = tmp.path().join("out");

    let params = parse(&[
        "--index",
        index_dir.to_str().unwrap(),
        "--libType",
        "U",
        "--unmatedReads",
        reads.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
        "--numRequiredObs",
        "100",
        "--threads",
        "1",
    ]);
    let experiment = run_session(&params);

    assert_eq!(experiment.num_observed_fragments(), 200);
    assert_eq!(experiment.total_assigned_fragments(), 200);
    // All reads come from t0.
    assert_eq!(experiment.transcripts()[0].total_count(), 200);
    assert_eq!(experiment.transcripts()[0].unique_count(), 200);
    assert_eq!(experiment.transcripts()[1].total_count(), 0);
    let rel = relative_masses(&experiment);
    assert!(rel[0] > 0.99, "t0 share = {}", rel[0]);

    // Cache files are temporaries and must be gone.
    assert!(!out.join("alnCache_0.bin").exists());
}

#[test]
fn cache_replay_matches_repeated_mapping() {
    let tmp = TempDir::new().unwrap();
    let t0 = generate_seq(11111, 400);
    let t1 = generate_seq(22222, 400);
    let t2 = generate_seq(33333, 400);
    let fasta = write_fasta(&tmp, &[("t0", &t0), ("t1", &t1), ("t2", &t2)]);
    let index_dir = tmp.path().join("index");
    TranscriptomeIndex::build(&[&fasta])
        .unwrap()
        .write(&index_dir)
        .unwrap();

    // Reads from two transcripts with a 3:1 skew.
    let reads_path = tmp.path().join("reads.fq");
    let mut file = fs::File::create(&reads_path).unwrap();
    for i in 0..200usize {
        let (src, label) = if i % 4 == 0 { (&t1, "b") } else { (&t0, "a") };
        let start = (i * 7) % (src.len() - 30);
        writeln!(file, "@{label}{i}").unwrap();
        writeln!(file, "{}", &src[start..start + 30]).unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "{}", "I".repeat(30)).unwrap();
    }
    drop(file);

    // Two passes via cache replay...
    let out_cached = tmp.path().join("out_cached");
    let cached = run_session(&parse(&[
        "--index",
        index_dir.to_str().unwrap(),
        "--libType",
        "U",
        "--unmatedReads",
        reads_path.to_str().unwrap(),
        "--output",
        out_cached.to_str().unwrap(),
        "--numRequiredObs",
        "400",
        "--threads",
        "1",
    ]));

    // ...versus two passes re-mapping from scratch.
    let out_direct = tmp.path().join("out_direct");
    let direct = run_session(&parse(&[
        "--index",
        index_dir.to_str().unwrap(),
        "--libType",
        "U",
        "--unmatedReads",
        reads_path.to_str().unwrap(),
        "--output",
        out_direct.to_str().unwrap(),
        "--numRequiredObs",
        "400",
        "--threads",
        "1",
        "--disableMappingCache",
    ]));

    assert_eq!(cached.num_observed_fragments(), 400);
    assert_eq!(direct.num_observed_fragments(), 400);
    assert_eq!(
        cached.total_assigned_fragments(),
        direct.total_assigned_fragments()
    );

    let rel_cached = relative_masses(&cached);
    let rel_direct = relative_masses(&direct);
    for (a, b) in rel_cached.iter().zip(&rel_direct) {
        assert!((a - b).abs() < 1e-6, "mass shares diverged: {a} vs {b}");
    }
}

#[test]
fn paired_end_session() {
    let tmp = TempDir::new().unwrap();
    let t0 = generate_seq(424242, 600);
    let t1 = generate_seq(848484, 600);
    let fasta = write_fasta(&tmp, &[("t0", &t0), ("t1", &t1)]);
    let index_dir = tmp.path().join("index");
    TranscriptomeIndex::build(&[&fasta])
        .unwrap()
        .write(&index_dir)
        .unwrap();

    let (p1, p2) = write_paired_end_reads(&tmp, &t0, 100);
    let out = tmp.path().join("out");

    let params = parse(&[
        "--index",
        index_dir.to_str().unwrap(),
        "--libType",
        "IU",
        "--mates1",
        p1.to_str().unwrap(),
        "--mates2",
        p2.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
        "--numRequiredObs",
        "50",
        "--threads",
        "1",
    ]);
    let experiment = run_session(&params);

    assert_eq!(experiment.num_observed_fragments(), 100);
    assert!(experiment.total_assigned_fragments() >= 95);
    let rel = relative_masses(&experiment);
    assert!(rel[0] > 0.99, "t0 share = {}", rel[0]);

    // Paired fragments carry a real fragment length.
    let counts = experiment.libraries()[0].lib_type_counts();
    assert!(counts.iter().sum::<u64>() > 0);
}

#[test]
fn multi_threaded_session_is_statistically_equivalent() {
    let tmp = TempDir::new().unwrap();
    let t0 = generate_seq(13579, 500);
    let t1 = generate_seq(24680, 500);
    let fasta = write_fasta(&tmp, &[("t0", &t0), ("t1", &t1)]);
    let index_dir = tmp.path().join("index");
    TranscriptomeIndex::build(&[&fasta])
        .unwrap()
        .write(&index_dir)
        .unwrap();

    let reads = write_single_end_reads(&tmp, "reads.fq", &t1, 400, 30);

    let run_with_threads = |threads: &str, out: &str| {
        run_session(&parse(&[
            "--index",
            index_dir.to_str().unwrap(),
            "--libType",
            "U",
            "--unmatedReads",
            reads.to_str().unwrap(),
            "--output",
            tmp.path().join(out).to_str().unwrap(),
            "--numRequiredObs",
            "200",
            "--threads",
            threads,
        ]))
    };

    let one = run_with_threads("1", "out_1t");
    let four = run_with_threads("4", "out_4t");

    assert_eq!(one.num_observed_fragments(), 400);
    assert_eq!(four.num_observed_fragments(), 400);
    assert_eq!(one.total_assigned_fragments(), four.total_assigned_fragments());

    // Not bitwise identical across thread counts, but the dominant
    // transcript must agree.
    let rel_one = relative_masses(&one);
    let rel_four = relative_masses(&four);
    assert!(rel_one[1] > 0.99);
    assert!(rel_four[1] > 0.99);
}
