// src/search/tests.rs
// 端到端场景: GrammarEnv + 查表协作方

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use super::*;
use crate::config::SearchConfig;
use crate::env::{Grammar, GrammarEnv, ProgramEnv, QuestionContext, Sample, Trajectory};
use crate::model::{BagOfTokensEncoder, FixedSketchPredictor, Models, StructureSketchEncoder, TableDecoder};
use crate::search::ops::masked_log_softmax;
use crate::sketch::{ScoredSketch, Sketch};

const TOL: f32 = 1e-4;

// ================ 测试夹具 ================

/// A -> {v0, v1} -> B ; C -> v0 -> B ; D 只能作为结束 token 注册
fn small_grammar() -> Arc<Grammar> {
    Arc::new(
        Grammar::new(0)
            .rule(None, &["A", "C"])
            .rule(Some("A"), &["v0", "v1"])
            .rule(Some("C"), &["v0"])
            .rule(Some("v0"), &["B"])
            .rule(Some("v1"), &["B"])
            .end_token("B")
            .end_token("D"),
    )
}

/// A 之后可以任意组合 v0 / v1 / v2，B 结束
fn loop_grammar() -> Arc<Grammar> {
    Arc::new(
        Grammar::new(8)
            .rule(None, &["A"])
            .rule(Some("A"), &["v0", "v1", "v2"])
            .rule(Some("v0"), &["v1", "v2", "B"])
            .rule(Some("v1"), &["v0", "v2", "B"])
            .rule(Some("v2"), &["v0", "v1", "B"])
            .end_token("B"),
    )
}

fn env(grammar: &Arc<Grammar>, name: &str) -> GrammarEnv {
    GrammarEnv::new(Arc::clone(grammar), QuestionContext::new(name, "which year was the first"))
}

fn scored(text: &str, log_prob: f32) -> ScoredSketch {
    ScoredSketch::new(Sketch::parse(text), log_prob)
}

struct Fixture {
    encoder: BagOfTokensEncoder,
    predictor: FixedSketchPredictor,
    sketch_encoder: StructureSketchEncoder,
    decoder: TableDecoder,
}

impl Fixture {
    fn new(predictor: FixedSketchPredictor, decoder: TableDecoder) -> Self {
        Self {
            encoder: BagOfTokensEncoder::new(8),
            predictor,
            sketch_encoder: StructureSketchEncoder::new(4),
            decoder,
        }
    }

    fn models(&self) -> Models<'_> {
        Models {
            encoder: &self.encoder,
            sketch_predictor: &self.predictor,
            sketch_encoder: &self.sketch_encoder,
            decoder: &self.decoder,
        }
    }

    fn agent(&self) -> Agent<'_> {
        Agent::new(self.models(), SearchConfig::default())
    }
}

fn programs(samples: &[Sample]) -> Vec<String> {
    samples.iter().map(|s| s.trajectory.human_readable_program()).collect()
}

/// 固定 logits 下，按记录观测重放整条轨迹的对数概率 (每一步都计分)
fn replay_log_prob(decoder_logits: &[f32], trajectory: &Trajectory) -> f32 {
    let logits = ndarray::Array1::from(decoder_logits.to_vec());
    trajectory
        .action_ids
        .iter()
        .zip(&trajectory.observations)
        .map(|(&a, obs)| masked_log_softmax(logits.view(), &obs.valid_actions)[a])
        .sum()
}

// ================ 草图引导束搜索 ================

#[test_log::test]
fn test_beam_search_ranks_variable_groundings() {
    let g = small_grammar();
    let (v0, v1) = (g.id("v0").unwrap(), g.id("v1").unwrap());
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()).with_logit(v0, 2.0).with_logit(v1, 0.5),
    );
    let mut agent = fixture.agent();

    let output = agent.beam_search(&[env(&g, "q")], 2, None, false).unwrap();
    let results = output.get("q").unwrap();
    assert_eq!(programs(results), vec!["A v0 B", "A v1 B"]);

    let log_z = (2.0f32.exp() + 0.5f32.exp()).ln();
    assert!((results[0].log_prob - (-0.1 + 2.0 - log_z)).abs() < TOL);
    assert!((results[1].log_prob - (-0.1 + 0.5 - log_z)).abs() < TOL);
    assert!((results[0].prob() + results[1].prob() - (-0.1f32).exp()).abs() < TOL);
}

#[test_log::test]
fn test_zero_sketches_give_empty_results() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("other", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent();
    let envs = [env(&g, "q"), env(&g, "other")];

    let output = agent.beam_search(&envs, 3, None, false).unwrap();
    assert_eq!(output.len(), 2);
    assert!(output.get("q").unwrap().is_empty());
    assert_eq!(output.get("other").unwrap().len(), 2);

    let mut rng = StdRng::seed_from_u64(3);
    let samples = agent.sample(&envs[..1], 4, None, &mut rng).unwrap();
    assert!(samples.is_empty());
}

#[test_log::test]
fn test_invalid_forced_token_is_discarded() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0)
            .with_sketches("q", vec![scored("A <VAR> D", -0.1), scored("C <VAR> B", -2.0)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());

    let output = agent.beam_search(&[env(&g, "q")], 4, None, false).unwrap();
    let results = output.get("q").unwrap();
    assert_eq!(programs(results), vec!["C v0 B"]);

    let events = agent.into_sink();
    assert!(events.iter().any(|e| matches!(
        e,
        SearchEvent::HypothesisDiscarded { reason: DiscardReason::ConstraintViolation, .. }
    )));
    assert!(!events.iter().any(|e| matches!(
        e,
        SearchEvent::HypothesisCompleted { program, .. } if program.ends_with('D')
    )));

    let mut agent = fixture.agent();
    let mut rng = StdRng::seed_from_u64(11);
    let constraint: ConstraintSketches = [("q".to_string(), vec![scored("A <VAR> D", 0.0)])].into_iter().collect();
    let samples = agent.sample(&[env(&g, "q")], 6, Some(&constraint), &mut rng).unwrap();
    assert!(samples.is_empty());
}

#[test_log::test]
fn test_beam_width_bounds_every_step() {
    let g = loop_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches(
            "q",
            vec![
                scored("A <VAR> <VAR> <VAR> B", -0.2),
                scored("A <VAR> <VAR> B", -0.4),
                scored("A <VAR> B", -0.9),
            ],
        ),
        TableDecoder::new(g.action_space()).with_history_coupling(1.0),
    );
    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let output = agent.beam_search(&[env(&g, "q")], 2, None, false).unwrap();
    assert_eq!(output.get("q").unwrap().len(), 2);

    let events = agent.into_sink();
    let active: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SearchEvent::StepStarted { t, active } if *t > 0 => Some(*active),
            _ => None,
        })
        .collect();
    assert!(!active.is_empty());
    assert!(active.iter().all(|&n| n <= 2));
}

#[test_log::test]
fn test_force_sketch_coverage_keeps_low_scoring_sketch() {
    let g = small_grammar();
    let sketches = vec![scored("A <VAR> B", -0.1), scored("C <VAR> B", -5.0)];
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", sketches),
        TableDecoder::new(g.action_space()),
    );

    let completed_c = |events: &[SearchEvent]| {
        events.iter().any(|e| matches!(
            e,
            SearchEvent::HypothesisCompleted { program, .. } if program == "C v0 B"
        ))
    };
    let max_active = |events: &[SearchEvent]| {
        events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::StepStarted { t, active } if *t > 0 => Some(*active),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    };

    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    agent.beam_search(&[env(&g, "q")], 1, None, false).unwrap();
    let events = agent.into_sink();
    assert!(!completed_c(&events));
    assert!(max_active(&events) <= 1);

    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let output = agent.beam_search(&[env(&g, "q")], 1, None, true).unwrap();
    let events = agent.into_sink();
    assert!(completed_c(&events));
    // 束宽 1 + 1 个补录草图
    assert_eq!(max_active(&events), 2);
    // 最终结果仍截断到束宽
    assert_eq!(output.get("q").unwrap().len(), 1);
}

#[test_log::test]
fn test_beam_scores_match_trajectory_scorer() {
    let g = loop_grammar();
    // 变量槽不会选到结束 token，重新打分时推导出的草图与搜索时一致
    let mut decoder = TableDecoder::new(g.action_space())
        .with_history_coupling(0.7)
        .with_logit(g.id("B").unwrap(), f32::NEG_INFINITY);
    for (i, token) in ["v0", "v1", "v2"].iter().enumerate() {
        decoder = decoder.with_logit(g.id(token).unwrap(), 0.3 * i as f32);
    }
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0)
            .with_sketches("q", vec![scored("A <VAR> <VAR> B", -0.3), scored("A <VAR> B", -1.2)]),
        decoder,
    );
    let mut agent = fixture.agent();

    let results = agent.beam_search(&[env(&g, "q")], 4, None, false).unwrap().into_list();
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].log_prob >= pair[1].log_prob);
    }

    // 整批重新打分 (长度不同的轨迹会被补齐)
    let trajectories: Vec<Trajectory> = results.iter().map(|s| s.trajectory.clone()).collect();
    let scores = agent.score_trajectories(&trajectories, true).unwrap();
    for (sample, rescored) in results.iter().zip(&scores.log_probs) {
        assert!(
            (sample.log_prob - rescored).abs() < TOL,
            "{}: beam {} vs scorer {}",
            sample.trajectory,
            sample.log_prob,
            rescored
        );
    }
    let entropy = scores.entropy.unwrap();
    assert!(entropy.iter().all(|h| *h >= 0.0 && h.is_finite()));

    let probs = agent.trajectory_probs(&trajectories, false).unwrap();
    for (sample, p) in results.iter().zip(probs) {
        assert!((sample.prob() - p).abs() < TOL);
    }
}

#[test_log::test]
fn test_sampled_scores_match_trajectory_scorer() {
    let g = loop_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0)
            .with_sketches("q", vec![scored("A <VAR> <VAR> B", -0.5), scored("A <VAR> B", -0.9)]),
        TableDecoder::new(g.action_space())
            .with_history_coupling(1.3)
            .with_logit(g.id("B").unwrap(), f32::NEG_INFINITY),
    );
    let mut agent = fixture.agent();
    let mut rng = StdRng::seed_from_u64(42);
    let samples = agent.sample(&[env(&g, "q"), env(&g, "q2")], 8, None, &mut rng).unwrap();
    assert_eq!(samples.len(), 8);

    let trajectories: Vec<Trajectory> = samples.iter().map(|s| s.trajectory.clone()).collect();
    let rescored = agent.trajectory_probs(&trajectories, true).unwrap();
    for (sample, lp) in samples.iter().zip(rescored) {
        assert!((sample.log_prob - lp).abs() < TOL);
    }
}

#[test_log::test]
fn test_scorer_rejects_trajectory_longer_than_sketch() {
    let g = small_grammar();
    let fixture = Fixture::new(FixedSketchPredictor::new(-10.0), TableDecoder::new(g.action_space()));
    let agent = fixture.agent();

    let mut program = env(&g, "q");
    for _ in 0..3 {
        program.step(0).unwrap();
    }
    let trajectory = program.to_trajectory();
    assert_eq!(trajectory.human_readable_program(), "A v0 B");

    let short = Arc::new(Sketch::parse("A <VAR>"));
    let err = agent
        .score_trajectories_with(&[trajectory.clone()], &[short], false)
        .unwrap_err();
    assert!(matches!(err, SearchError::Desynchronized { t: 2, sketch_len: 2, .. }));

    let exact = Arc::new(Sketch::parse("A <VAR> B"));
    assert!(agent.score_trajectories_with(&[trajectory], &[exact], false).is_ok());
}

#[test_log::test]
fn test_search_leaves_input_environments_untouched() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent();
    let envs = [env(&g, "q")];
    agent.beam_search(&envs, 2, None, false).unwrap();
    agent.sample(&envs, 2, None, &mut StdRng::seed_from_u64(0)).unwrap();
    assert!(envs[0].human_readable_program().is_empty());
    assert!(!envs[0].is_done());
}

#[test_log::test]
fn test_desynchronized_sketch_aborts_search() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR>", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent();

    let err = agent.beam_search(&[env(&g, "q")], 2, None, false).unwrap_err();
    assert!(matches!(err, SearchError::Desynchronized { t: 2, sketch_len: 2, .. }));

    let err = agent
        .sample(&[env(&g, "q")], 2, None, &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    assert!(matches!(err, SearchError::Desynchronized { .. }));
}

#[test_log::test]
fn test_masked_out_candidates_are_dropped() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", 0.0)]),
        TableDecoder::new(g.action_space()).with_logit(g.id("v1").unwrap(), f32::NEG_INFINITY),
    );
    let mut agent = fixture.agent();
    let output = agent.beam_search(&[env(&g, "q")], 4, None, false).unwrap();
    assert_eq!(programs(output.get("q").unwrap()), vec!["A v0 B"]);
}

#[test_log::test]
fn test_fully_masked_variable_slot_is_discarded() {
    let g = small_grammar();
    let (v0, v1) = (g.id("v0").unwrap(), g.id("v1").unwrap());
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", 0.0)]),
        TableDecoder::new(g.action_space())
            .with_logit(v0, f32::NEG_INFINITY)
            .with_logit(v1, f32::NEG_INFINITY),
    );
    let no_valid_action = |events: &[SearchEvent]| {
        events.iter().any(|e| matches!(
            e,
            SearchEvent::HypothesisDiscarded { reason: DiscardReason::NoValidAction, .. }
        ))
    };

    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let output = agent.beam_search(&[env(&g, "q")], 2, None, false).unwrap();
    assert!(output.get("q").unwrap().is_empty());
    assert!(no_valid_action(&agent.into_sink()));

    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let samples = agent.sample(&[env(&g, "q")], 3, None, &mut StdRng::seed_from_u64(2)).unwrap();
    assert!(samples.is_empty());
    let events = agent.into_sink();
    assert!(no_valid_action(&events));
    assert!(!events.iter().any(|e| matches!(
        e,
        SearchEvent::HypothesisDiscarded { reason: DiscardReason::ExecutionError, .. }
    )));

    // 起始的两个动作都被屏蔽
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0),
        TableDecoder::new(g.action_space())
            .with_logit(g.id("A").unwrap(), f32::NEG_INFINITY)
            .with_logit(g.id("C").unwrap(), f32::NEG_INFINITY),
    );
    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let samples = agent
        .sample_unconstrained(&[env(&g, "q")], 2, &mut StdRng::seed_from_u64(2))
        .unwrap();
    assert!(samples.is_empty());
    assert!(no_valid_action(&agent.into_sink()));
}

// ================ 采样 ================

#[test_log::test]
fn test_sample_zero_returns_nothing() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent();
    let mut rng = StdRng::seed_from_u64(5);
    assert!(agent.sample(&[env(&g, "q")], 0, None, &mut rng).unwrap().is_empty());
    assert!(agent.sample_unconstrained(&[env(&g, "q")], 0, &mut rng).unwrap().is_empty());
}

#[test_log::test]
fn test_sampling_is_reproducible_with_seed() {
    let g = loop_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches(
            "q",
            vec![scored("A <VAR> <VAR> B", -0.5), scored("A <VAR> <VAR> <VAR> B", -0.6)],
        ),
        TableDecoder::new(g.action_space()).with_history_coupling(0.4),
    );
    let run = |seed| {
        let mut agent = fixture.agent();
        let mut rng = StdRng::seed_from_u64(seed);
        agent.sample(&[env(&g, "q")], 10, None, &mut rng).unwrap()
    };
    let a = run(9);
    let b = run(9);
    assert_eq!(programs(&a), programs(&b));
    let scores_a: Vec<f32> = a.iter().map(|s| s.log_prob).collect();
    let scores_b: Vec<f32> = b.iter().map(|s| s.log_prob).collect();
    assert_eq!(scores_a, scores_b);
}

#[test_log::test]
fn test_unconstrained_sample_scores_every_step() {
    let g = small_grammar();
    let logits = vec![0.5, -0.2, 1.0, 0.0, 0.3, 0.0];
    let mut decoder = TableDecoder::new(g.action_space());
    for (a, l) in logits.iter().enumerate() {
        decoder = decoder.with_logit(a, *l);
    }
    let fixture = Fixture::new(FixedSketchPredictor::new(-10.0), decoder);
    let mut agent = fixture.agent();
    let mut rng = StdRng::seed_from_u64(21);
    let samples = agent.sample_unconstrained(&[env(&g, "q")], 5, &mut rng).unwrap();
    assert_eq!(samples.len(), 5);
    for sample in &samples {
        assert_eq!(sample.trajectory.len(), 3);
        assert!((sample.log_prob - replay_log_prob(&logits, &sample.trajectory)).abs() < TOL);
    }
}

// ================ 无草图束搜索 ================

#[test_log::test]
fn test_plain_beam_search_pads_unequal_beams() {
    let wide = loop_grammar();
    let narrow = small_grammar();
    let logits = vec![0.1, 0.7, -0.4, 0.2, 0.0, 0.5];

    let mut decoder = TableDecoder::new(wide.action_space().max(narrow.action_space()));
    for (a, l) in logits.iter().enumerate() {
        decoder = decoder.with_logit(a, *l);
    }
    let fixture = Fixture::new(FixedSketchPredictor::new(-10.0), decoder);
    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());

    let wide_env = env(&wide, "wide");
    let narrow_env = env(&narrow, "narrow");
    let output = agent.plain_beam_search(&[wide_env], 3).unwrap();
    let wide_results = output.get("wide").unwrap().to_vec();
    assert_eq!(wide_results.len(), 3);
    for pair in wide_results.windows(2) {
        assert!(pair[0].log_prob >= pair[1].log_prob);
    }
    for sample in &wide_results {
        assert!((sample.log_prob - replay_log_prob(&logits, &sample.trajectory)).abs() < TOL);
    }

    let output = agent.plain_beam_search(&[narrow_env], 3).unwrap();
    let narrow_results = output.get("narrow").unwrap();
    // A v0 B, A v1 B, C v0 B
    assert_eq!(narrow_results.len(), 3);
    for sample in narrow_results {
        assert!((sample.log_prob - replay_log_prob(&logits, &sample.trajectory)).abs() < TOL);
    }
}

/// x 之后可以直接结束，z 之后必须经过 v，v 之后可以再走一步 w
fn detour_grammar() -> Arc<Grammar> {
    Arc::new(
        Grammar::new(0)
            .rule(None, &["x", "z"])
            .rule(Some("x"), &["B", "y"])
            .rule(Some("z"), &["v"])
            .rule(Some("v"), &["B", "w"])
            .rule(Some("w"), &["B"])
            .end_token("B"),
    )
}

#[test_log::test]
fn test_plain_beam_search_expands_until_no_live_hypothesis() {
    let g = detour_grammar();
    let id = |token: &str| g.id(token).unwrap();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0),
        TableDecoder::new(g.action_space())
            .with_logit(id("z"), 2.0)
            .with_step_logit(1, id("B"), 0.0)
            .with_step_logit(1, id("y"), -5.0)
            .with_step_logit(2, id("B"), 0.1)
            .with_step_logit(2, id("w"), 0.0),
    );
    let mut agent = fixture.agent();

    // t=2 时已完成 "x B" 与 "z v B" 两个假设，但 "z v w" 仍在束中且分数更高
    let output = agent.plain_beam_search(&[env(&g, "q")], 2).unwrap();
    let results = output.get("q").unwrap();
    assert_eq!(programs(results), vec!["z v B", "z v w B"]);

    let lp_z = 2.0 - (1.0 + 2.0f32.exp()).ln();
    let log_z2 = (0.1f32.exp() + 1.0).ln();
    assert!((results[0].log_prob - (lp_z + 0.1 - log_z2)).abs() < TOL);
    assert!((results[1].log_prob - (lp_z - log_z2)).abs() < TOL);
}

#[test_log::test]
fn test_plain_beam_search_batches_questions_together() {
    let g = loop_grammar();
    let small = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0),
        TableDecoder::new(g.action_space().max(small.action_space())).with_history_coupling(0.5),
    );

    let mut agent = fixture.agent();
    let separate_a = agent.plain_beam_search(&[env(&g, "a")], 2).unwrap().into_list();
    let separate_b = agent.plain_beam_search(&[env(&small, "b")], 2).unwrap().into_list();

    let mut agent = fixture.agent().with_sink(Vec::<SearchEvent>::new());
    let joint = agent.plain_beam_search(&[env(&g, "a"), env(&small, "b")], 2).unwrap();
    assert_eq!(programs(joint.get("a").unwrap()), programs(&separate_a));
    assert_eq!(programs(joint.get("b").unwrap()), programs(&separate_b));
    for (x, y) in joint.get("a").unwrap().iter().zip(&separate_a) {
        assert!((x.log_prob - y.log_prob).abs() < TOL);
    }

    // 每一步的批次都是矩形: 行数 = 活跃问题数 * 最大活跃假设数
    let events = agent.into_sink();
    for e in &events {
        if let SearchEvent::StepStarted { active, .. } = e {
            assert!(*active == 1 || *active % 2 == 0, "rows={}", active);
        }
    }
}

// ================ 缓存过滤与批量解码 ================

#[test_log::test]
fn test_use_cache_skips_exhausted_environments() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0)
            .with_sketches("a", vec![scored("A <VAR> B", -0.1)])
            .with_sketches("b", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let config = SearchConfig { use_cache: true, ..Default::default() };
    let mut agent = Agent::new(fixture.models(), config);

    let mut exhausted = env(&g, "a");
    exhausted.mark_exhausted();
    let envs = [exhausted, env(&g, "b")];

    let output = agent.beam_search(&envs, 2, None, false).unwrap();
    assert!(output.get("a").unwrap().is_empty());
    assert_eq!(output.get("b").unwrap().len(), 2);

    let samples = agent.sample(&envs, 3, None, &mut StdRng::seed_from_u64(2)).unwrap();
    assert!(samples.iter().all(|s| s.trajectory.env_name == "b"));
    assert!(agent.plain_beam_search(&envs, 2).unwrap().get("a").unwrap().is_empty());
}

#[test_log::test]
fn test_decode_examples_keeps_input_order_across_batches() {
    let g = small_grammar();
    let names = ["q0", "q1", "q2"];
    let mut predictor = FixedSketchPredictor::new(-10.0);
    for (i, name) in names.iter().enumerate() {
        let sketch = if i == 1 { "C <VAR> B" } else { "A <VAR> B" };
        predictor = predictor.with_sketches(name, vec![scored(sketch, -0.1)]);
    }
    let fixture = Fixture::new(predictor, TableDecoder::new(g.action_space()));
    let envs: Vec<GrammarEnv> = names.iter().map(|n| env(&g, n)).collect();

    for constrained in [false, true] {
        let config = SearchConfig {
            decode_batch_size: 2,
            use_sketch_constrained_decoding: constrained,
            ..Default::default()
        };
        let mut agent = Agent::new(fixture.models(), config);
        let results = agent.decode_examples(&envs, 2).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].len(), 2);
        assert_eq!(programs(&results[1]), vec!["C v0 B"]);
        assert_eq!(results[2][0].trajectory.env_name, "q2");
    }
}

#[test_log::test]
fn test_constraint_sketches_replace_predictor() {
    let g = small_grammar();
    let fixture = Fixture::new(
        FixedSketchPredictor::new(-10.0).with_sketches("q", vec![scored("A <VAR> B", -0.1)]),
        TableDecoder::new(g.action_space()),
    );
    let mut agent = fixture.agent();
    let constraint: ConstraintSketches = [("q".to_string(), vec![scored("C <VAR> B", -0.7)])].into_iter().collect();
    let output = agent.beam_search(&[env(&g, "q"), env(&g, "missing")], 3, Some(&constraint), false).unwrap();
    assert_eq!(programs(output.get("q").unwrap()), vec!["C v0 B"]);
    assert!((output.get("q").unwrap()[0].log_prob + 0.7).abs() < TOL);
    assert!(output.get("missing").unwrap().is_empty());
}
