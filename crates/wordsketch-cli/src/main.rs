use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use wordsketch_core::collocations::CollocationsReader;
use wordsketch_core::config::BuildConfig;
use wordsketch_core::diagnostics;
use wordsketch_core::error::UserError;
use wordsketch_core::lexicon::Lexicon;
use wordsketch_core::pipeline::run_build;
use wordsketch_core::query::{PrecomputedExecutor, QueryExecutor};
use wordsketch_core::relations::RelationRegistry;
use wordsketch_core::sentence_store::SentenceStoreReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The index directory this command operates on.
    #[arg(long, default_value = "index/")]
    index_dir: PathBuf,

    /// Overrides the built-in relation catalog with one loaded from a JSON
    /// file (an array of relation definitions, spec §9).
    #[arg(long, global = true)]
    relations_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds an index from a CoNLL-U corpus file, running the full
    /// ingest → reduce → write pipeline.
    Build {
        /// Path to the CoNLL-U input file.
        #[arg(long)]
        input: PathBuf,

        #[arg(long, default_value_t = 5)]
        window_size: u32,

        #[arg(long, default_value_t = 25)]
        top_k: u32,

        #[arg(long, default_value_t = 10)]
        min_headword_frequency: u64,

        #[arg(long, default_value_t = 2)]
        min_cooccurrence: u64,
    },

    /// Looks up a headword's collocates in a built index.
    Query {
        #[arg(long)]
        headword: String,

        /// Relation id from the relation registry (`any` matches everything).
        #[arg(long, default_value = "any")]
        relation: String,

        #[arg(long, default_value_t = 0.0)]
        min_log_dice: f32,

        #[arg(long, default_value_t = 25)]
        limit: usize,

        /// Include up to this many example sentences per collocate.
        #[arg(long)]
        examples: Option<usize>,
    },

    /// Prints the full word sketch for a headword: every relation id
    /// mapped to its collocate list, in one call (spec §6).
    Sketch {
        #[arg(long)]
        headword: String,
    },

    /// Runs the integrity report over the top-N highest-frequency
    /// headwords and exits non-zero if systemic drift is flagged.
    Diagnostics {
        #[arg(long, default_value_t = 100)]
        top_n: usize,

        #[arg(long, default_value_t = 5)]
        window: u32,

        #[arg(long, default_value_t = 0.2)]
        ratio: f64,

        #[arg(long, default_value_t = 0.1)]
        fraction: f64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let Cli { index_dir, relations_file, command } = Cli::parse();

    match command {
        Command::Build { input, window_size, top_k, min_headword_frequency, min_cooccurrence } => {
            build(index_dir, input, window_size, top_k, min_headword_frequency, min_cooccurrence)
        }
        Command::Query { headword, relation, min_log_dice, limit, examples } => {
            query(index_dir, relations_file, headword, relation, min_log_dice, limit, examples)
        }
        Command::Sketch { headword } => sketch(index_dir, relations_file, headword),
        Command::Diagnostics { top_n, window, ratio, fraction } => {
            run_diagnostics(index_dir, top_n, window, ratio, fraction)
        }
    }
}

/// Writes one line to `out`, treating a broken pipe (the downstream reader
/// exited, e.g. `wordsketch query ... | head`) as the client-gone
/// condition rather than a fatal error: logged at debug and reported back
/// as `false` so the caller stops producing further output.
fn write_line(out: &mut impl Write, line: &str) -> anyhow::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!(error = %UserError::ClientGone, "stopping output");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Loads the relation catalog override, if `--relations-file` was given,
/// else falls back to the built-in catalog.
fn load_registry(relations_file: &Option<PathBuf>) -> anyhow::Result<RelationRegistry> {
    match relations_file {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            RelationRegistry::from_json(&bytes).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(RelationRegistry::builtin()),
    }
}

fn build(
    index_dir: PathBuf,
    input: PathBuf,
    window_size: u32,
    top_k: u32,
    min_headword_frequency: u64,
    min_cooccurrence: u64,
) -> anyhow::Result<()> {
    if !input.exists() {
        return Err(UserError::MissingCorpusPath(input.display().to_string()).into());
    }

    let config = BuildConfig { window_size, top_k, min_headword_frequency, min_cooccurrence, ..Default::default() };

    let file = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
    let reader = BufReader::new(file);

    eprintln!("Building index at {}...", index_dir.display());
    let report = run_build(reader, &index_dir, &config).context("while building the index")?;

    println!("build report:");
    for (name, count) in report.snapshot() {
        println!("  {name}: {count}");
    }
    Ok(())
}

fn query(
    index_dir: PathBuf,
    relations_file: Option<PathBuf>,
    headword: String,
    relation_id: String,
    min_log_dice: f32,
    limit: usize,
    examples: Option<usize>,
) -> anyhow::Result<()> {
    let reader = Arc::new(open_collocations(&index_dir)?);
    let registry = load_registry(&relations_file)?;
    let relation =
        registry.get(&relation_id).ok_or_else(|| UserError::UnknownRelation(relation_id.clone()))?;

    let mut executor = PrecomputedExecutor::new(Arc::clone(&reader));
    if let Some(max_examples) = examples {
        let sentences = Arc::new(open_sentences(&index_dir)?);
        let lexicon = Arc::new(
            Lexicon::read_stats_bin(&index_dir.join("stats.bin"))
                .with_context(|| format!("reading {}", index_dir.join("stats.bin").display()))?,
        );
        executor = executor.with_witness(sentences, lexicon, max_examples);
    }

    let cancel = AtomicBool::new(false);
    let results = executor.find_collocations(&headword, relation, min_log_dice, limit, &cancel)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in results {
        let line = format!(
            "{}\t{}\tcooc={}\tlogDice={:.2}\trelFreq={:.6}",
            row.lemma, row.pos, row.cooccurrence, row.log_dice, row.relative_frequency
        );
        if !write_line(&mut out, &line)? {
            break;
        }
        for example in &row.examples {
            if !write_line(&mut out, &format!("  > {example}"))? {
                break;
            }
        }
    }
    Ok(())
}

/// Word sketch endpoint (spec §6): relation id → collocate list, one call.
fn sketch(index_dir: PathBuf, relations_file: Option<PathBuf>, headword: String) -> anyhow::Result<()> {
    let reader = Arc::new(open_collocations(&index_dir)?);
    let registry = load_registry(&relations_file)?;
    let executor = PrecomputedExecutor::new(Arc::clone(&reader));
    let cancel = AtomicBool::new(false);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    'relations: for relation in registry.iter() {
        let results = executor.find_collocations(&headword, relation, 0.0, 25, &cancel)?;
        if results.is_empty() {
            continue;
        }
        if !write_line(&mut out, &format!("{} ({}):", relation.display_name, relation.id))? {
            break;
        }
        for row in results {
            let line = format!("  {}\tlogDice={:.2}\tcooc={}", row.lemma, row.log_dice, row.cooccurrence);
            if !write_line(&mut out, &line)? {
                break 'relations;
            }
        }
    }
    Ok(())
}

fn run_diagnostics(
    index_dir: PathBuf,
    top_n: usize,
    window: u32,
    ratio: f64,
    fraction: f64,
) -> anyhow::Result<()> {
    let reader = open_collocations(&index_dir)?;
    let sentences = open_sentences(&index_dir)?;
    let lexicon = Lexicon::read_stats_bin(&index_dir.join("stats.bin"))
        .with_context(|| format!("reading {}", index_dir.join("stats.bin").display()))?;

    let report = diagnostics::run_report(&reader, &sentences, &lexicon, top_n, window, ratio, fraction);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for headword in &report.headwords {
        let line = format!(
            "{}\tcollocates={}\tmissing={}\tmalformed={}\tno_witness={}\tratio={:.3}",
            headword.headword,
            headword.collocate_count,
            headword.missing_collocate,
            headword.malformed_lemma,
            headword.no_witness_span,
            headword.mismatch_ratio()
        );
        if !write_line(&mut out, &line)? {
            break;
        }
    }

    if report.systemic_mismatch {
        eprintln!("systemic mismatch detected: collocations.bin may be stale relative to the sentence store");
        std::process::exit(1);
    }
    Ok(())
}

fn open_collocations(index_dir: &std::path::Path) -> anyhow::Result<CollocationsReader> {
    let path = index_dir.join("collocations.bin");
    CollocationsReader::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn open_sentences(index_dir: &std::path::Path) -> anyhow::Result<SentenceStoreReader> {
    let path = index_dir.join("sentences");
    SentenceStoreReader::open(&path).with_context(|| format!("opening {}", path.display()))
}
