//! Top-level orchestration: CoNLL-U stream → Ingester → Reducer →
//! CollocationsWriter (spec §2's data-flow line), the single entry point
//! the CLI's `build` subcommand calls.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use crate::collocations::CollocationsWriter;
use crate::config::BuildConfig;
use crate::conllu::ConlluReader;
use crate::error::{Result, UserError};
use crate::ingest::Ingester;
use crate::lexicon::Lexicon;
use crate::progress::BuildReport;
use crate::sentence_store::SentenceStoreWriter;

/// Runs a full build from a CoNLL-U stream into `index_dir`, returning the
/// accumulated `BuildReport`. `index_dir` ends up containing `stats.bin`,
/// `stats.tsv`, the sealed sentence store, and `collocations.bin`.
#[tracing::instrument(skip_all)]
pub fn run_build<R: BufRead>(
    reader: R,
    index_dir: &Path,
    config: &BuildConfig,
) -> Result<Arc<BuildReport>> {
    config.validate().map_err(|reason| UserError::InvalidArgument { name: "build_config", reason })?;
    std::fs::create_dir_all(index_dir)?;

    let report = Arc::new(BuildReport::new());
    let lexicon = Arc::new(Lexicon::new());
    let sentences_dir = index_dir.join("sentences");
    let run_dir = index_dir.join("runs");

    let sentence_writer = SentenceStoreWriter::create(&sentences_dir)?;
    let ingester =
        Ingester::new(Arc::clone(&lexicon), sentence_writer, run_dir.clone(), config, Arc::clone(&report))?;

    let mut total_sentences: u64 = 0;
    for sentence in ConlluReader::new(reader) {
        let sentence = sentence?;
        ingester.ingest_sentence(sentence)?;
        total_sentences += 1;
    }

    let (sentence_reader, _run_count) = ingester.finalize()?;

    lexicon.write_stats_bin(&index_dir.join("stats.bin"), total_sentences)?;
    lexicon.write_stats_tsv(&index_dir.join("stats.tsv"))?;

    let collocations_path = index_dir.join("collocations.bin");
    let writer = CollocationsWriter::create(
        &collocations_path,
        config.window_size,
        config.top_k,
        lexicon.total_tokens(),
    )?;

    let writer = crate::reduce::run(
        config.shard_count,
        &run_dir,
        &lexicon,
        &sentence_reader,
        config,
        Arc::clone(&report),
        writer,
    )?;
    writer.seal()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExecutor;
    use std::io::Cursor;

    #[test]
    fn builds_scenario_a_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = "1\tThe\tthe\tDET\tDT\t_\t_\t_\t_\t_\n\
                      2\tbig\tbig\tADJ\tJJ\t_\t_\t_\t_\t_\n\
                      3\thouse\thouse\tNOUN\tNN\t_\t_\t_\t_\t_\n\n\
                      1\tThe\tthe\tDET\tDT\t_\t_\t_\t_\t_\n\
                      2\tsmall\tsmall\tADJ\tJJ\t_\t_\t_\t_\t_\n\
                      3\thouse\thouse\tNOUN\tNN\t_\t_\t_\t_\t_\n\n";

        let mut config = BuildConfig::default();
        config.window_size = 5;
        config.top_k = 10;
        config.min_cooccurrence = 1;
        config.min_headword_frequency = 1;

        let report = run_build(Cursor::new(input), dir.path(), &config).unwrap();
        assert_eq!(report.sentences_ingested.get(), 2);

        let reader =
            crate::collocations::CollocationsReader::open(dir.path().join("collocations.bin")).unwrap();
        let entry = reader.get(b"house").unwrap();
        let lemmas: Vec<String> =
            entry.collocations.iter().map(|c| String::from_utf8_lossy(&c.lemma).into_owned()).collect();

        // "the" co-occurs with "house" in both sentences (cooc=2, freq=2),
        // giving it the highest logDice of the three; "big"/"small" each
        // co-occur once and tie on logDice/cooc, broken by ascending lemma.
        assert_eq!(lemmas, vec!["the".to_string(), "big".to_string(), "small".to_string()]);

        let registry = crate::relations::RelationRegistry::builtin();
        let modifier = registry.get("modifier").unwrap();
        let executor = crate::query::PrecomputedExecutor::new(Arc::new(reader));
        let cancel = std::sync::atomic::AtomicBool::new(false);
        let modifiers = executor.find_collocations("house", modifier, 0.0, 10, &cancel).unwrap();
        let modifier_lemmas: Vec<String> = modifiers.iter().map(|c| c.lemma.clone()).collect();
        assert_eq!(modifier_lemmas, vec!["big".to_string(), "small".to_string()]);
    }
}
