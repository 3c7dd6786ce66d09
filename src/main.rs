use std::io::Write;
use std::time::Instant;

use clap::Parser;

use nano_gptj::{GenerationConfig, ModelContext};

#[derive(Parser, Debug)]
#[command(name = "nano-gptj")]
#[command(about = "A minimalistic GPT-J inference engine")]
struct Args {
    /// Path to the model file
    #[arg(short, long)]
    model: String,

    /// Input prompt
    #[arg(short, long)]
    prompt: String,

    /// Maximum tokens to generate
    #[arg(short = 'n', long, default_value = "200")]
    n_predict: usize,

    /// Top-k sampling
    #[arg(long, default_value = "40")]
    top_k: usize,

    /// Top-p (nucleus) sampling
    #[arg(long, default_value = "0.9")]
    top_p: f32,

    /// Sampling temperature
    #[arg(long, default_value = "0.9")]
    temperature: f32,

    /// Prompt tokens per forward pass
    #[arg(short = 'b', long, default_value = "8")]
    n_batch: usize,

    /// Backend worker-thread hint
    #[arg(short = 't', long)]
    n_threads: Option<usize>,

    /// RNG seed (defaults to the clock)
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> nano_gptj::Result<()> {
    let defaults = GenerationConfig::default();
    let config = GenerationConfig {
        seed: args.seed,
        n_threads: args.n_threads.unwrap_or(defaults.n_threads),
        n_predict: args.n_predict,
        top_k: args.top_k,
        top_p: args.top_p,
        temperature: args.temperature,
        n_batch: args.n_batch,
    };

    let load_start = Instant::now();
    let mut ctx = ModelContext::load(&args.model)?;
    eprintln!(
        "loaded {} in {:.1}s ({} token context)",
        args.model,
        load_start.elapsed().as_secs_f64(),
        ctx.n_ctx()
    );

    print!("{}", args.prompt);
    let mut stdout = std::io::stdout();
    let _ = stdout.flush();

    let gen_start = Instant::now();
    let generated = ctx.generate(&args.prompt, &config, |piece| {
        print!("{piece}");
        stdout.flush().is_ok()
    })?;
    println!();

    let elapsed = gen_start.elapsed().as_secs_f64();
    eprintln!(
        "{} tokens in {:.1}s ({:.1} tokens/s)",
        generated,
        elapsed,
        generated as f64 / elapsed.max(1e-9)
    );

    Ok(())
}
