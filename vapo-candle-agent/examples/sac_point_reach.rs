use anyhow::Result;
use clap::Parser;
use log::info;
use std::{fs, path::Path};
use vapo_candle_agent::{
    encoder::EncoderConfig,
    heads::{GaussianPolicy, GaussianPolicyConfig, QNetwork, QNetworkConfig},
    opt::OptimizerConfig,
    point_reach::{PointReach, PointReachConfig},
    sac::{CriticConfig, EntCoefMode, GaussianActorConfig, Sac, SacConfig},
    Device, ObsBatch, TensorBatch,
};
use vapo_core::{
    evaluator::{DefaultEvaluator, Evaluator as _},
    generic_replay_buffer::{
        SimpleReplayBuffer, SimpleReplayBufferConfig, SimpleStepProcessor,
        SimpleStepProcessorConfig,
    },
    Agent, Configurable, Trainer, TrainerConfig,
};
use vapo_tensorboard::TensorboardRecorder;

type Env = PointReach;
type ReplayBuffer = SimpleReplayBuffer<ObsBatch, TensorBatch>;
type StepProc = SimpleStepProcessor<Env, ObsBatch, TensorBatch>;
type Evaluator = DefaultEvaluator<Env>;
type SacAgent = Sac<Env, QNetwork, GaussianPolicy, ReplayBuffer>;

const DIM: usize = 2;
const LR_ACTOR: f64 = 3e-4;
const LR_CRITIC: f64 = 3e-4;
const LR_ENT_COEF: f64 = 3e-4;
const BATCH_SIZE: usize = 256;
const LEARNING_STARTS: usize = 1000;
const LOG_INTERVAL: usize = 1000;
const REPLAY_BUFFER_CAPACITY: usize = 100_000;
const N_EPISODES_PER_EVAL: usize = 5;
const MODEL_DIR: &str = "./model/sac_point_reach";

/// Train/eval SAC agent in the point reach environment
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Train SAC agent, not evaluate
    #[arg(short, long, default_value_t = false)]
    train: bool,

    /// Evaluate SAC agent, not train
    #[arg(short, long, default_value_t = false)]
    eval: bool,

    /// Number of environment steps
    #[arg(long, default_value_t = 20_000)]
    total_timesteps: usize,

    /// Directory of checkpoints and TensorBoard logs
    #[arg(long, default_value_t = MODEL_DIR.to_string())]
    model_dir: String,

    /// Resume from `last.ckpt` in the model directory
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Use CUDA device of the given ordinal
    #[arg(long)]
    cuda: Option<usize>,
}

fn create_agent_config(args: &Args) -> SacConfig<QNetworkConfig, GaussianPolicyConfig> {
    let encoder = EncoderConfig::Vector { dim: DIM };
    let actor_config = GaussianActorConfig::default()
        .opt_config(OptimizerConfig::default().learning_rate(LR_ACTOR))
        .pi_config(GaussianPolicyConfig::new(encoder.clone(), DIM).units(vec![64, 64]));
    let critic_config = CriticConfig::default()
        .opt_config(OptimizerConfig::default().learning_rate(LR_CRITIC))
        .q_config(QNetworkConfig::new(encoder, DIM).units(vec![64, 64]));
    let device = match args.cuda {
        Some(n) => Device::Cuda(n),
        None => Device::Cpu,
    };

    SacConfig::default()
        .batch_size(BATCH_SIZE)
        .actor_config(actor_config)
        .critic_config(critic_config)
        .ent_coef_mode(EntCoefMode::Auto {
            init: 1.0,
            lr: LR_ENT_COEF,
        })
        .device(device)
}

fn create_trainer_config(args: &Args) -> TrainerConfig {
    TrainerConfig::default()
        .total_timesteps(args.total_timesteps)
        .learning_starts(LEARNING_STARTS)
        .log_interval(LOG_INTERVAL)
        .n_eval_episodes(N_EPISODES_PER_EVAL)
        .model_dir(&args.model_dir)
        .save_replay_buffer(args.resume)
}

fn train(args: &Args) -> Result<()> {
    let model_dir = Path::new(&args.model_dir);
    fs::create_dir_all(model_dir)?;
    let env_config = PointReachConfig::default().dim(DIM);
    let agent_config = create_agent_config(args);
    let trainer_config = create_trainer_config(args);
    env_config.save(model_dir.join("env.yaml"))?;
    agent_config.save(model_dir.join("agent.yaml"))?;
    trainer_config.save(model_dir.join("trainer.yaml"))?;

    let step_proc_config = SimpleStepProcessorConfig::default();
    let replay_buffer_config = SimpleReplayBufferConfig::default().capacity(REPLAY_BUFFER_CAPACITY);
    let mut trainer = Trainer::<Env, StepProc, ReplayBuffer>::build(
        trainer_config,
        &env_config,
        Some(&env_config),
        &step_proc_config,
        &replay_buffer_config,
    )?;
    let mut agent = SacAgent::build(agent_config)?;
    let last = model_dir.join("last.ckpt");
    if args.resume && last.is_file() {
        trainer.load(&mut agent, &last)?;
    }
    let mut recorder = TensorboardRecorder::new(model_dir);

    trainer.learn(&mut agent, &mut recorder)
}

fn eval(args: &Args) -> Result<()> {
    let model_dir = Path::new(&args.model_dir);
    let env_config = PointReachConfig::default().dim(DIM);
    let mut agent = SacAgent::build(create_agent_config(args))?;
    agent.load_params(&model_dir.join("best_eval.ckpt"))?;
    agent.eval();

    let stats = Evaluator::new(&env_config, 0, N_EPISODES_PER_EVAL, None)?.evaluate(&mut agent)?;
    info!(
        "Mean return {:.3} (std {:.3}) over {} episodes",
        stats.mean_return,
        stats.std_return,
        stats.n_episodes()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.train {
        train(&args)?;
    } else if args.eval {
        eval(&args)?;
    } else {
        train(&args)?;
        eval(&args)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_sac_point_reach() -> Result<()> {
        let tmp_dir = TempDir::new("sac_point_reach")?;
        let model_dir = match tmp_dir.as_ref().to_str() {
            Some(s) => s.to_string(),
            None => panic!("Failed to get string of temporary directory"),
        };
        let args = Args {
            train: false,
            eval: false,
            total_timesteps: 1200,
            model_dir,
            resume: false,
            cuda: None,
        };
        train(&args)?;
        eval(&args)?;
        Ok(())
    }
}
