// src/main.rs
// 演示: 在一个玩具文法上依次运行轨迹打分、采样和两种束搜索
//
// 用法: nsm_search [config.json] [events.csv]

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use nsm_search::*;

// ================ 玩具文法 ================

/// hop / filter 两类操作，参数是内存变量 v0..v2，以 return 结束
fn demo_grammar() -> Arc<Grammar> {
    Arc::new(
        Grammar::new(8)
            .rule(None, &["hop", "filter"])
            .rule(Some("hop"), &["v0", "v1"])
            .rule(Some("filter"), &["v1", "v2"])
            .rule(Some("v0"), &["v1", "return"])
            .rule(Some("v1"), &["v2", "return"])
            .rule(Some("v2"), &["return"])
            .end_token("return"),
    )
}

fn demo_envs(grammar: &Arc<Grammar>) -> Vec<GrammarEnv> {
    vec![
        GrammarEnv::new(
            Arc::clone(grammar),
            QuestionContext::new("nt-0", "which team won the most games").with_constants(&["team", "wins"]),
        )
        .with_answer(&["hop", "v0", "return"]),
        GrammarEnv::new(
            Arc::clone(grammar),
            QuestionContext::new("nt-1", "who scored after 1990").with_constants(&["player", "year"]),
        )
        .with_answer(&["filter", "v1", "v2", "return"]),
    ]
}

fn demo_predictor() -> FixedSketchPredictor {
    let sketch = |text: &str, log_prob: f32| ScoredSketch::new(Sketch::parse(text), log_prob);
    FixedSketchPredictor::new(-8.0)
        .with_sketches(
            "nt-0",
            vec![sketch("hop <VAR> return", -0.4), sketch("hop <VAR> <VAR> return", -1.2)],
        )
        .with_sketches(
            "nt-1",
            vec![sketch("filter <VAR> <VAR> return", -0.3), sketch("filter <VAR> return", -1.5)],
        )
}

fn demo_decoder(grammar: &Grammar) -> TableDecoder {
    let mut decoder = TableDecoder::new(grammar.action_space()).with_history_coupling(0.8);
    for (token, logit) in [("v0", 0.6), ("v1", 0.9), ("v2", 0.2), ("return", 0.4)] {
        if let Some(id) = grammar.id(token) {
            decoder = decoder.with_logit(id, logit);
        }
    }
    decoder
}

fn log_samples(title: &str, samples: &[Sample]) {
    log::info!("{} ({} 条)", title, samples.len());
    for s in samples {
        log::info!("  {:<32} log_prob={:.4} prob={:.4}", s.trajectory.human_readable_program(), s.log_prob, s.prob());
    }
}

// ================ 主流程 ================

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            log::info!("加载配置: {}", path);
            SearchConfig::from_json_file(&path)?
        }
        None => SearchConfig::default(),
    };
    let events_path = args.next();
    log::info!("搜索配置: {:?}", config);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let grammar = demo_grammar();
    let envs = demo_envs(&grammar);

    let encoder = BagOfTokensEncoder::new(16);
    let predictor = demo_predictor();
    let sketch_encoder = StructureSketchEncoder::new(4);
    let decoder = demo_decoder(&grammar);
    let models = Models {
        encoder: &encoder,
        sketch_predictor: &predictor,
        sketch_encoder: &sketch_encoder,
        decoder: &decoder,
    };
    let beam_width = config.beam_width;
    let num_sketches = config.num_sketches;

    // --- 1. 采样 ---
    let mut agent = Agent::new(models, config.clone());
    let samples = agent.sample(&envs, num_sketches, None, &mut rng)?;
    log_samples("草图引导采样", &samples);

    let free_samples = agent.sample_unconstrained(&envs, num_sketches, &mut rng)?;
    log_samples("无草图采样", &free_samples);

    // --- 2. 轨迹打分 ---
    let trajectories: Vec<Trajectory> = samples.iter().map(|s| s.trajectory.clone()).collect();
    let scores = agent.score_trajectories(&trajectories, true)?;
    for (i, t) in trajectories.iter().enumerate() {
        log::info!(
            "  重新打分 {:<24} log_prob={:.4} 草图先验={:.4} 熵={:.4}",
            t.human_readable_program(),
            scores.log_probs[i],
            scores.sketch_log_probs[i],
            scores.entropy.as_ref().map(|e| e[i]).unwrap_or(f32::NAN),
        );
    }

    // --- 3. 草图引导束搜索 ---
    let output = match &events_path {
        Some(path) => {
            log::info!("搜索事件写入 {}", path);
            let mut agent = Agent::new(models, config.clone()).with_sink(CsvEventSink::open(path)?);
            agent.beam_search(&envs, beam_width, None, config.force_sketch_coverage)?
        }
        None => {
            let mut agent = Agent::new(models, config.clone()).with_sink(LogSink);
            agent.beam_search(&envs, beam_width, None, config.force_sketch_coverage)?
        }
    };
    for (env, result) in envs.iter().zip(&output.per_question) {
        log_samples(&format!("束搜索 {}", env.name()), &result.samples);
    }

    // --- 4. 无草图束搜索 ---
    let plain = agent.plain_beam_search(&envs, beam_width)?;
    for result in &plain.per_question {
        log_samples(&format!("无草图束搜索 {}", result.name), &result.samples);
    }

    // --- 5. 批量解码 ---
    let decoded = agent.decode_examples(&envs, beam_width)?;
    for (env, samples) in envs.iter().zip(&decoded) {
        let best = samples.first().map(|s| s.trajectory.human_readable_program());
        log::info!("decode_examples {}: 最优程序 {:?}", env.name(), best);
    }

    Ok(())
}
