//! Command-line demo surface
//!
//! Drives the library end-to-end on synthetic data: a forward/loss pass
//! over a padded batch, and greedy generation through the incremental
//! step path. Optimizer stepping and real data loading are a training
//! loop's concern, not this binary's.

use clap::{Args, Parser, Subcommand};
use ndarray::Array2;

use crate::config::{CellType, RnnLmConfig};
use crate::error::{ModelError, Result};
use crate::model::RnnLm;
use crate::trace::TRACER;

#[derive(Parser)]
#[command(name = "recurrente", about = "Recurrent language model core demo")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Model hyperparameters shared by both subcommands
#[derive(Args)]
pub struct ModelArgs {
    /// Vocabulary size
    #[arg(long, default_value_t = 100)]
    pub vocab: usize,

    /// Embedding dimension
    #[arg(long, default_value_t = 16)]
    pub input: usize,

    /// Hidden dimension
    #[arg(long, default_value_t = 32)]
    pub hidden: usize,

    /// Number of stacked layers
    #[arg(long, default_value_t = 2)]
    pub layers: usize,

    /// Cell family: gru or lstm
    #[arg(long, default_value = "gru")]
    pub cell: String,

    /// Adaptive softmax cutoffs, e.g. --cutoffs 20,60
    #[arg(long, value_delimiter = ',')]
    pub cutoffs: Vec<usize>,

    /// Tail projection divisor for the adaptive softmax
    #[arg(long, default_value_t = 2.0)]
    pub div_value: f32,
}

#[derive(Subcommand)]
pub enum Command {
    /// Forward a synthetic padded batch and report loss and perplexity
    Demo {
        #[command(flatten)]
        model: ModelArgs,

        /// Label smoothing weight
        #[arg(long, default_value_t = 0.1)]
        smoothing: f32,

        /// Normalize loss by token count instead of batch size
        #[arg(long)]
        length_normalized: bool,

        /// Batch size
        #[arg(long, default_value_t = 4)]
        batch: usize,

        /// Padded sequence length
        #[arg(long, default_value_t = 12)]
        time: usize,

        /// Print phase timing after the pass
        #[arg(long)]
        trace: bool,
    },
    /// Generate greedily through the incremental step path
    Generate {
        #[command(flatten)]
        model: ModelArgs,

        /// Starting token id
        #[arg(long, default_value_t = 1)]
        start: u32,

        /// Number of tokens to generate
        #[arg(long, default_value_t = 20)]
        len: usize,
    },
}

fn build_config(args: &ModelArgs) -> Result<RnnLmConfig> {
    let cell = match args.cell.as_str() {
        "gru" => CellType::Gru,
        "lstm" => CellType::Lstm,
        other => {
            return Err(ModelError::Config(format!(
                "unknown cell type '{other}', expected gru or lstm"
            )))
        }
    };
    let mut config = RnnLmConfig::new(args.vocab, args.input, args.hidden)
        .with_layers(args.layers)
        .with_cell(cell);
    if !args.cutoffs.is_empty() {
        config = config.with_adaptive(args.cutoffs.clone(), args.div_value);
    }
    Ok(config)
}

/// Deterministic synthetic token batch
fn synthetic_batch(batch: usize, time: usize, vocab: usize) -> (Array2<u32>, Vec<usize>) {
    let ids = Array2::from_shape_fn((batch, time), |(b, t)| ((b * 17 + t * 5 + 1) % vocab) as u32);
    let lengths = (0..batch).map(|b| time - (b % (time / 2 + 1))).collect();
    (ids, lengths)
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Demo {
            model,
            smoothing,
            length_normalized,
            batch,
            time,
            trace,
        } => {
            let config = build_config(&model)?
                .with_smoothing(smoothing)
                .with_length_normalized(length_normalized);
            let lm = RnnLm::new(config)?;
            if trace {
                TRACER.enable();
            }

            let (ids, lengths) = synthetic_batch(batch, time, model.vocab);
            // next-token labels, padded positions ignored
            let labels = Array2::from_shape_fn(ids.dim(), |(b, t)| {
                if t + 1 < lengths[b] {
                    ids[[b, t + 1]] as i64
                } else {
                    -1
                }
            });
            let out = lm.train_forward(ids.view(), &lengths, labels.view(), &lengths)?;

            println!("batch {batch} x {time}, lengths {lengths:?}");
            println!("loss:       {:.4}", out.loss);
            println!("batch ppl:  {:.2}", out.batch_ppl);
            for (b, ppl) in out.per_seq_ppl.iter().enumerate() {
                println!("seq {b} ppl:  {ppl:.2}");
            }
            if trace {
                println!("{}", TRACER.report());
            }
            Ok(())
        }
        Command::Generate { model, start, len } => {
            let config = build_config(&model)?;
            let lm = RnnLm::new(config)?;

            let mut state = lm.initial_state(1);
            let mut token = start;
            let mut generated = vec![token];
            for _ in 0..len {
                let input = Array2::from_elem((1, 1), token);
                let (log_probs, next_state) = lm.infer_step(input.view(), &[1], &state)?;
                // greedy argmax over the next-token distribution
                let (best, _) = log_probs
                    .index_axis(ndarray::Axis(0), 0)
                    .index_axis(ndarray::Axis(0), 0)
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                        if v > bv {
                            (i, v)
                        } else {
                            (bi, bv)
                        }
                    });
                token = best as u32;
                generated.push(token);
                state = next_state;
            }
            println!("{generated:?}");
            Ok(())
        }
    }
}
