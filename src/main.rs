use dist_finetune::{
    gpu_tensor_operation, process_batch, setup, setup_logging, Backend, BatchError, ConfigError,
    CustomDataset, DatasetError, Device, DistError, OpError, ProcessGroup, RendezvousConfig,
    TensorError,
};

use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

// --- CLI Commands ---

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
enum Cli {
    /// Join the process group and report the loss of this rank's shard
    Finetune {
        #[clap(long, help = "Rank of this process (0-based)")]
        rank: usize,
        #[clap(long, help = "Total number of processes in the group")]
        world_size: usize,
        #[clap(long, help = "Path to a `label<TAB>text` dataset file")]
        dataset: PathBuf,
        #[clap(long, default_value = "8", help = "Number of examples per batch")]
        batch_size: usize,
        #[clap(long, help = "Rendezvous backend (`tcp` or `local`), overrides DIST_BACKEND")]
        backend: Option<Backend>,
    },
    /// Average the code points of a text on a device
    TensorOp {
        #[clap(long, help = "Text to reduce")]
        text: String,
        #[clap(long, default_value = "cpu", help = "Device: `cpu`, `gpu` or `gpu:<index>`")]
        device: Device,
    },
}

// --- Custom Error Type ---

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("process group error: {0}")]
    Dist(#[from] DistError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("operation error: {0}")]
    Op(#[from] OpError),
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// --- Helper Functions ---

fn load_dataset(path: &Path) -> Result<CustomDataset, AppError> {
    info!(path = %path.display(), "loading dataset");
    let file = File::open(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(CustomDataset::from_tsv(BufReader::new(file))?)
}

// Stand-in for a served model: echoes the prompt.
fn echo_response(prompt: &str) -> String {
    format!("echo: {prompt}")
}

// --- Finetune Logic ---

fn run_finetune(
    group: &ProcessGroup,
    dataset: &CustomDataset,
    batch_size: usize,
) -> Result<Option<f32>, AppError> {
    let shard = dataset.shard(group.rank(), group.world_size())?;
    info!(
        rank = group.rank(),
        examples = shard.len(),
        total = dataset.len(),
        "dataset shard ready"
    );

    let mut losses = Vec::new();
    for (i, batch) in shard.batches(batch_size)?.iter().enumerate() {
        let start_time = Instant::now();
        let loss = process_batch(&(), &batch.prompts, &batch.labels, echo_response)?.item()?;
        info!(
            batch = i,
            size = batch.len(),
            loss,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "batch processed"
        );
        losses.push(loss);
    }

    if losses.is_empty() {
        return Ok(None);
    }
    Ok(Some(losses.iter().sum::<f32>() / losses.len() as f32))
}

fn run(cli: Cli) -> Result<(), AppError> {
    match cli {
        Cli::Finetune {
            rank,
            world_size,
            dataset,
            batch_size,
            backend,
        } => {
            let mut config = RendezvousConfig::from_env()?;
            if let Some(backend) = backend {
                config.backend = backend;
            }
            let dataset = load_dataset(&dataset)?;

            let group = setup(rank, world_size, &config)?;
            // On error the group is released by drop.
            let mean_loss = run_finetune(&group, &dataset, batch_size)?;
            match mean_loss {
                Some(loss) => info!(rank, loss, "mean batch loss"),
                None => info!(rank, "no examples assigned to this rank"),
            }
            group.cleanup();
        }
        Cli::TensorOp { text, device } => {
            let result = gpu_tensor_operation(&text, device)?;
            println!("{result}");
        }
    }
    Ok(())
}

// --- Main Logic ---

fn main() {
    setup_logging();

    if let Err(e) = run(Cli::parse()) {
        error!(error = %e, "dist-finetune failed");
        std::process::exit(1);
    }
}
