//! End-to-end model tests on a tiny configuration.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::TransformerConfig;
use crate::dropout::Mode;
use crate::model::{TrainingBatch, Transformer};

fn tiny_config() -> TransformerConfig {
    let mut config = TransformerConfig::base(8, 8);
    config.hidden_size = 4;
    config.filter_size = 8;
    config.num_heads = 1;
    config.num_encoder_layers = 1;
    config.num_decoder_layers = 1;
    config.attention_dropout = 0.0;
    config.residual_dropout = 0.0;
    config.relu_dropout = 0.0;
    config
}

fn tiny_model(config: TransformerConfig) -> Transformer {
    let mut rng = StdRng::seed_from_u64(17);
    Transformer::new(config, &mut rng).unwrap()
}

fn tokens(rows: &[&[u32]]) -> Array2<u32> {
    let cols = rows[0].len();
    let flat: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Array2::from_shape_vec((rows.len(), cols), flat).unwrap()
}

#[test]
fn test_training_logits_shape() {
    let model = tiny_model(tiny_config());
    let batch = TrainingBatch {
        source: tokens(&[&[5, 7, 0]]),
        target: tokens(&[&[2, 3, 4]]),
        labels: tokens(&[&[2, 3, 4]]),
    };

    let logits = model.forward(&batch, &mut Mode::train(0)).unwrap();
    assert_eq!(logits.shape(), &[1, 3, 8]);
    assert!(logits.iter().all(|v| v.is_finite()));
}

#[test]
fn test_forward_rejects_inference_mode() {
    let model = tiny_model(tiny_config());
    let batch = TrainingBatch {
        source: tokens(&[&[5, 7]]),
        target: tokens(&[&[2, 3]]),
        labels: tokens(&[&[2, 3]]),
    };
    assert!(model.forward(&batch, &mut Mode::infer()).is_err());
}

#[test]
fn test_decode_before_encode_fails() {
    let model = tiny_model(tiny_config());
    let mut state = model.empty_state(1);
    let result = model.decode(&tokens(&[&[2]]), &mut state, &mut Mode::infer());
    assert!(result.is_err());
}

#[test]
fn test_incremental_decode_matches_training_logits() {
    // With every dropout rate at zero, feeding the target prefix token by
    // token through the cached path must reproduce the teacher-forced
    // logits position by position.
    let model = tiny_model(tiny_config());
    let source = tokens(&[&[5, 7, 0]]);
    let target = tokens(&[&[2, 3, 4]]);

    let batch = TrainingBatch {
        source: source.clone(),
        target: target.clone(),
        labels: target.clone(),
    };
    let full = model.forward(&batch, &mut Mode::train(0)).unwrap();

    let mut mode = Mode::infer();
    let mut state = model.empty_state(1);
    model.encode(&source, &mut state, &mut mode).unwrap();

    for step in 1..=3 {
        let prefix = tokens(&[&target.as_slice().unwrap()[..step]]);
        let logits = model.decode(&prefix, &mut state, &mut mode).unwrap();
        assert_eq!(logits.shape(), &[1, 1, 8]);
        assert_eq!(state.step_count(), step);

        for v in 0..8 {
            assert!(
                (logits[[0, 0, v]] - full[[0, step - 1, v]]).abs() < 1e-4,
                "step {} vocab {}: incremental {} vs full {}",
                step,
                v,
                logits[[0, 0, v]],
                full[[0, step - 1, v]]
            );
        }
    }
}

#[test]
fn test_multi_head_incremental_decode_matches_training_logits() {
    let mut config = tiny_config();
    config.num_heads = 2;
    let model = tiny_model(config);
    let source = tokens(&[&[5, 7, 0]]);
    let target = tokens(&[&[2, 3, 4]]);

    let batch = TrainingBatch {
        source: source.clone(),
        target: target.clone(),
        labels: target.clone(),
    };
    let full = model.forward(&batch, &mut Mode::train(0)).unwrap();

    let mut mode = Mode::infer();
    let mut state = model.empty_state(1);
    model.encode(&source, &mut state, &mut mode).unwrap();

    model.decode(&tokens(&[&[2]]), &mut state, &mut mode).unwrap();
    model
        .decode(&tokens(&[&[2, 3]]), &mut state, &mut mode)
        .unwrap();
    let last = model.decode(&target, &mut state, &mut mode).unwrap();

    for v in 0..8 {
        assert!((last[[0, 0, v]] - full[[0, 2, v]]).abs() < 1e-4);
    }
}

#[test]
fn test_incremental_decode_rejects_prefix_gap() {
    let model = tiny_model(tiny_config());
    let source = tokens(&[&[5, 7]]);
    let mut mode = Mode::infer();
    let mut state = model.empty_state(1);
    model.encode(&source, &mut state, &mut mode).unwrap();

    // Skipping straight to a length-2 prefix with an empty cache must fail.
    let result = model.decode(&tokens(&[&[2, 3]]), &mut state, &mut mode);
    assert!(result.is_err());
}

#[test]
fn test_trailing_source_padding_leaves_logits_unchanged() {
    let model = tiny_model(tiny_config());

    // Padded key positions are masked out of every attention pass, so
    // extending the source with more padding cannot move the logits.
    let run = |source: Array2<u32>| {
        let mut mode = Mode::infer();
        let mut state = model.empty_state(1);
        model.encode(&source, &mut state, &mut mode).unwrap();
        model
            .decode(&tokens(&[&[2]]), &mut state, &mut mode)
            .unwrap()
    };

    let short = run(tokens(&[&[5, 7, 0]]));
    let long = run(tokens(&[&[5, 7, 0, 0]]));

    for v in 0..8 {
        assert!(
            (short[[0, 0, v]] - long[[0, 0, v]]).abs() < 1e-4,
            "vocab {}: {} vs {}",
            v,
            short[[0, 0, v]],
            long[[0, 0, v]]
        );
    }
}

#[test]
fn test_encode_stores_output_and_padding_bias() {
    let model = tiny_model(tiny_config());
    let mut state = model.empty_state(1);
    model
        .encode(&tokens(&[&[5, 7, 0]]), &mut state, &mut Mode::infer())
        .unwrap();
    assert!(state.is_encoded());

    let (output, bias, caches) = state.decode_parts_mut().unwrap();
    assert_eq!(output.shape(), &[1, 3, 4]);
    assert_eq!(bias.shape(), &[1, 1, 1, 3]);
    // Only the trailing pad token is masked.
    assert_eq!(bias[[0, 0, 0, 0]], 0.0);
    assert_eq!(bias[[0, 0, 0, 1]], 0.0);
    assert_eq!(bias[[0, 0, 0, 2]], crate::bias::MASK_VALUE);
    assert_eq!(caches.len(), 1);
}

#[test]
fn test_first_decoder_position_ignores_all_target_tokens() {
    // The decoder input is right-shifted: position 0 reads a zero vector,
    // so its logits cannot depend on any target token.
    let model = tiny_model(tiny_config());
    let source = tokens(&[&[5, 7, 1]]);

    let run = |target: Array2<u32>| {
        let mut mode = Mode::train(0);
        let mut state = model.empty_state(1);
        model.encode(&source, &mut state, &mut mode).unwrap();
        model.decode(&target, &mut state, &mut mode).unwrap()
    };

    let a = run(tokens(&[&[2, 3, 4]]));
    let b = run(tokens(&[&[6, 1, 5]]));

    for v in 0..8 {
        assert!((a[[0, 0, v]] - b[[0, 0, v]]).abs() < 1e-5);
    }
    // Later positions do depend on the prefix.
    let differs = (0..8).any(|v| (a[[0, 1, v]] - b[[0, 1, v]]).abs() > 1e-5);
    assert!(differs);
}

#[test]
fn test_dropout_is_deterministic_per_seed() {
    let mut config = tiny_config();
    config.residual_dropout = 0.3;
    let model = tiny_model(config);

    let batch = TrainingBatch {
        source: tokens(&[&[5, 7, 1]]),
        target: tokens(&[&[2, 3, 4]]),
        labels: tokens(&[&[2, 3, 4]]),
    };

    let a = model.forward(&batch, &mut Mode::train(42)).unwrap();
    let b = model.forward(&batch, &mut Mode::train(42)).unwrap();
    let c = model.forward(&batch, &mut Mode::train(43)).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_embedding_sharing_follows_config_flags() {
    let mut config = tiny_config();
    config.shared_source_target_embedding = true;
    config.shared_embedding_and_softmax_weights = true;
    let shared = tiny_model(config);
    assert!(shared
        .source_embedding()
        .shares_storage_with(shared.target_embedding()));
    assert!(shared
        .target_embedding()
        .shares_storage_with(shared.softmax_embedding()));

    let split = tiny_model(tiny_config());
    assert!(!split
        .source_embedding()
        .shares_storage_with(split.target_embedding()));
    assert!(!split
        .target_embedding()
        .shares_storage_with(split.softmax_embedding()));
}

#[test]
fn test_loss_is_finite_and_ignores_padding_labels() {
    let model = tiny_model(tiny_config());
    let batch = TrainingBatch {
        source: tokens(&[&[5, 7, 0]]),
        target: tokens(&[&[2, 3, 4]]),
        labels: tokens(&[&[2, 3, 0]]),
    };

    let loss = model.loss(&batch, &mut Mode::train(0)).unwrap();
    assert!(loss.is_finite());
    assert!(loss > 0.0);

    let all_padding = TrainingBatch {
        source: tokens(&[&[5, 7]]),
        target: tokens(&[&[2, 3]]),
        labels: tokens(&[&[0, 0]]),
    };
    assert!(model.loss(&all_padding, &mut Mode::train(0)).is_err());
}

#[test]
fn test_batched_sequences_decode_independently() {
    let model = tiny_model(tiny_config());

    let batch = TrainingBatch {
        source: tokens(&[&[5, 7, 0], &[5, 7, 0]]),
        target: tokens(&[&[2, 3, 4], &[2, 3, 4]]),
        labels: tokens(&[&[2, 3, 4], &[2, 3, 4]]),
    };
    let logits = model.forward(&batch, &mut Mode::train(0)).unwrap();

    // Identical rows in a batch produce identical logits.
    for pos in 0..3 {
        for v in 0..8 {
            assert!((logits[[0, pos, v]] - logits[[1, pos, v]]).abs() < 1e-5);
        }
    }
}
