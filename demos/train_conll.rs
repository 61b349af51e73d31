use dmv_em::parser::{ChartParser, EisnerParser};
use dmv_em::train::{DmvOptions, EmType};
use dmv_em::{CorpusBuilder, DmvModel};

const SAMPLE: &str = "1\tThe\tthe\tDET\tDT\t_\t2\tdet\t_\t_
2\tdog\tdog\tNOUN\tNN\t_\t3\tnsubj\t_\t_
3\tbarks\tbark\tVERB\tVBZ\t_\t0\troot\t_\t_

1\tA\ta\tDET\tDT\t_\t3\tdet\t_\t_
2\tsmall\tsmall\tADJ\tJJ\t_\t3\tamod\t_\t_
3\tcat\tcat\tNOUN\tNN\t_\t4\tnsubj\t_\t_
4\tsleeps\tsleep\tVERB\tVBZ\t_\t0\troot\t_\t_

1\tDogs\tdog\tNOUN\tNNS\t_\t2\tnsubj\t_\t_
2\tbark\tbark\tVERB\tVBP\t_\t0\troot\t_\t_
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("DMV EM Training Example");
    println!("=======================\n");

    // Load a CoNLL file given on the command line, or the built-in sample
    let mut builder = CorpusBuilder::new();
    let count = match std::env::args().nth(1) {
        Some(path) => builder.read_conll_file(&path)?,
        None => builder.read_conll(SAMPLE.as_bytes())?,
    };
    let corpus = builder.build()?;
    println!("Loaded {} sentences", count);
    println!("  Tags: {}", corpus.tag_index().len());
    println!("  Vocabulary: {}\n", corpus.vocab().len());

    let mut options = DmvOptions::default();
    options.set_em_type(EmType::Em);
    options.set("function_mask", "true")?;
    println!("Options:");
    println!("  em_type: {}", options.get("em_type")?);
    println!("  param_smoothing: {}\n", options.get("param_smoothing")?);

    let mut model = DmvModel::from_corpus(&corpus, options)?;
    model.init_param(corpus.sentences())?;
    let history = model.train(corpus.sentences(), 16, 5)?;
    for (i, ll) in history.iter().enumerate() {
        println!("  iteration {}: log-likelihood = {:.4}", i + 1, ll);
    }

    let path = std::env::temp_dir().join("example_grammar.dmv");
    model.save(&path)?;
    println!("\nSaved grammar to {}", path.display());

    // Reload and print the best parse of every sentence
    let model = DmvModel::load(&path, model.options().clone())?;
    let tables = model.evaluate(corpus.sentences())?;
    let parser = EisnerParser::new();
    for (b, sentence) in corpus.sentences().iter().enumerate() {
        let tree = parser.best_parse(&tables.sentence(b)?)?;
        let arcs: Vec<String> = (1..sentence.len())
            .map(|m| {
                let tag = model.tag_index().tag_name(sentence.tags[m]).unwrap_or("?");
                match tree.heads[m] {
                    Some(h) => format!("{}<-{}", tag, h),
                    None => format!("{}<-?", tag),
                }
            })
            .collect();
        println!("  sentence {}: {}", sentence.id, arcs.join(" "));
    }

    std::fs::remove_file(&path)?;
    Ok(())
}
