mod common;

use common::*;
use more_asserts::{assert_ge, assert_gt, assert_le, assert_lt};
use perturb_rs::norms::{batch_linf, batch_pnorm, PNorm};
use perturb_rs::{AttackConfig, AttackError, ExecutionContext, NormOrder, ProjectionAttacker};

const TOL: f64 = 1e-12;

#[test]
fn test_untargeted_loss_increases() {
    let model = linear_stub();
    let image = gray_image(32);
    let mut attacker =
        ProjectionAttacker::new(scenario_config(false), ExecutionContext::cpu(0)).unwrap();
    let outcome = attacker.perturb(&model, image.view(), 0).unwrap();
    assert_eq!(outcome.trajectory.len(), 5);

    let mut previous = loss_of(&model, image.view(), 0);
    let start = previous;
    for adversarial in outcome.trajectory.iter() {
        let loss = loss_of(&model, adversarial, 0);
        assert_ge!(loss, previous - TOL);
        previous = loss;
    }
    assert_gt!(previous, start);
    let first = loss_of(&model, outcome.trajectory.get(0).unwrap(), 0);
    assert_gt!(first, start);
}

#[test]
fn test_targeted_loss_decreases() {
    let model = linear_stub();
    let image = gray_image(32);
    let mut attacker =
        ProjectionAttacker::new(scenario_config(true), ExecutionContext::cpu(0)).unwrap();
    let outcome = attacker.perturb(&model, image.view(), 0).unwrap();
    assert_eq!(outcome.trajectory.len(), 5);

    let mut previous = loss_of(&model, image.view(), 0);
    let start = previous;
    for adversarial in outcome.trajectory.iter() {
        let loss = loss_of(&model, adversarial, 0);
        assert_le!(loss, previous + TOL);
        previous = loss;
    }
    assert_lt!(previous, start);
}

#[test]
fn test_scenario_saturates_the_ball() {
    let model = linear_stub();
    let image = gray_image(32);
    let mut attacker =
        ProjectionAttacker::new(scenario_config(false), ExecutionContext::cpu(0)).unwrap();
    let trajectory = attacker.perturb(&model, image.view(), 0).unwrap().trajectory;
    let expected = [0.01, 0.02, 0.03, 0.03, 0.03];
    for (adversarial, radius) in trajectory.iter().zip(expected.iter()) {
        let delta = &adversarial - &image;
        assert!((batch_linf(delta.view())[0] - radius).abs() < 1e-9);
    }
    let stacked = trajectory.stacked().unwrap();
    assert_eq!(stacked.shape(), &[5, 3, 32, 32]);
}

#[test]
fn test_recorded_primary_loss_tracks_trajectory() {
    let model = linear_stub();
    let image = gray_image(32);
    let mut attacker =
        ProjectionAttacker::new(scenario_config(false), ExecutionContext::cpu(0)).unwrap();
    let outcome = attacker.perturb(&model, image.view(), 0).unwrap();
    let recorded = outcome.loss_record.get("loss1").unwrap();
    assert_eq!(recorded.len(), 5);
    // each entry is the loss before that iteration's update
    assert!((recorded[0] - loss_of(&model, image.view(), 0)).abs() < 1e-9);
    for i in 1..5 {
        let before = loss_of(&model, outcome.trajectory.get(i - 1).unwrap(), 0);
        assert!((recorded[i] - before).abs() < 1e-9);
    }
}

#[test]
fn test_l2_attack_respects_ball() {
    let model = small_cnn(7, 4);
    let image = gray_image(16);
    let config = AttackConfig {
        ord: NormOrder::L2,
        epsilon: 0.5,
        step_size: 0.2,
        num_steps: 6,
        image_width: 16,
        image_resize: 20,
        prob: 0.5,
        momentum: 1.,
        ti_size: 3,
        grid_scale: 4,
        sample_times: 3,
        sample_grid_num: 4,
        lam: 1.,
        ..AttackConfig::default()
    };
    let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(3)).unwrap();
    let outcome = attacker.perturb(&model, image.view(), 1).unwrap();
    assert_eq!(outcome.trajectory.len(), 6);
    for adversarial in outcome.trajectory.iter() {
        let delta = &adversarial - &image;
        assert_le!(batch_pnorm(delta.view(), PNorm::L2)[0], 0.5 + 1e-9);
        assert!(adversarial.iter().all(|v| (0. ..=1.).contains(v)));
    }
}

#[test]
fn test_ila_replaces_trajectory() {
    let model = small_cnn(1, 5);
    let image = gray_image(16);
    let config = AttackConfig {
        attack_method: "ila".to_string(),
        epsilon: 0.05,
        step_size: 0.01,
        num_steps: 3,
        image_width: 16,
        lam: 0.,
        rand_init: false,
        ila_layer: 1,
        ila_niters: 7,
        ..AttackConfig::default()
    };
    let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
    let outcome = attacker
        .perturb_with_alternate_gradient_path(&model, image.view(), 2)
        .unwrap();
    assert_eq!(outcome.trajectory.len(), 7);
    assert_eq!(outcome.loss_record.len(), 3);
    for adversarial in outcome.trajectory.iter() {
        let delta = &adversarial - &image;
        assert_le!(batch_linf(delta.view())[0], 0.05 + TOL);
    }
}

#[test]
fn test_plain_perturb_ignores_method_flags() {
    let model = ForwardOnly(small_cnn(2, 3));
    let image = gray_image(16);
    let config = AttackConfig {
        attack_method: "linbp_ila".to_string(),
        num_steps: 2,
        image_width: 16,
        lam: 0.,
        ila_niters: 4,
        ..AttackConfig::default()
    };
    let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
    let outcome = attacker.perturb(&model, image.view(), 0).unwrap();
    assert_eq!(outcome.trajectory.len(), 2);
}

#[test]
fn test_missing_capability_is_reported() {
    let model = ForwardOnly(small_cnn(2, 3));
    let image = gray_image(16);
    for method in ["linbp", "ila"] {
        let config = AttackConfig {
            attack_method: method.to_string(),
            num_steps: 2,
            image_width: 16,
            lam: 0.,
            ila_niters: 2,
            ..AttackConfig::default()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        let result = attacker.perturb_with_alternate_gradient_path(&model, image.view(), 0);
        assert!(matches!(
            result,
            Err(AttackError::UnsupportedCapability { .. })
        ));
    }
}

#[test]
fn test_config_from_json() {
    let config = AttackConfig::from_json_str(
        r#"{"attack_method": "linbp", "epsilon": 0.03, "num_steps": 3, "ord": "2", "lam": "inf", "image_width": 16}"#,
    )
    .unwrap();
    assert_eq!(config.ord, NormOrder::L2);
    assert!(config.lam.is_infinite());
    assert!(config.method().linearized_backprop);

    let bad = AttackConfig::from_json_str(r#"{"ord": "1"}"#);
    assert!(matches!(bad, Err(AttackError::Json { .. })));
    assert!(matches!(
        "1".parse::<NormOrder>(),
        Err(AttackError::UnsupportedNorm { .. })
    ));
}
