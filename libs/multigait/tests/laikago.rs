use approx::assert_relative_eq;
use multigait::{EnvConfig, Environment, LaikagoConfig, Mechanism, RapierMechanism, LAIKAGO_URDF};

fn laikago_env() -> Environment<RapierMechanism> {
    let config = EnvConfig::with_velocity(1.0);
    let mechanism = RapierMechanism::from_config(LAIKAGO_URDF, &config).unwrap();
    Environment::new(mechanism, config).unwrap()
}

#[test]
fn test_dimensions() {
    let env = laikago_env();
    assert_eq!(env.ob_dim(), 26);
    assert_eq!(env.action_dim(), 8);
    assert_eq!(env.observe().len(), 26);

    for (i, name) in LaikagoConfig::FOOT_BODIES.iter().enumerate() {
        assert_eq!(env.mechanism().body_index(name), Some(3 + 3 * i));
    }
}

#[test]
fn test_rollout_stays_finite() {
    let mut env = laikago_env();
    for k in 0..100 {
        let action: Vec<f64> = (0..8).map(|j| ((k + j) as f64 * 0.3).sin()).collect();
        let reward = env.step(&action).unwrap();
        assert!(reward.is_finite());
        assert_relative_eq!(reward, env.reward_breakdown().sum(), epsilon = 1e-9);
        assert!(env.observe().iter().all(|v| v.is_finite()));

        let signal = env.is_terminal_state();
        if signal.terminated {
            assert_eq!(signal.terminal_reward, LaikagoConfig::TERMINAL_REWARD);
            break;
        }
        assert_eq!(signal.terminal_reward, 0.0);
    }
}

#[test]
fn test_standing_lands_on_feet() {
    let mut env = laikago_env();
    for _ in 0..50 {
        env.step(&[0.0; 8]).unwrap();
    }
    assert!(!env.is_terminal_state().terminated);
    assert!(env.foot_impulse().iter().sum::<f64>() > 0.0);
    let height = env.observation()[0];
    assert!(height > 0.2 && height < 0.6, "base at {height}");
}

#[test]
fn test_reset_is_history_independent() {
    let mut env = laikago_env();
    let initial = env.observe();

    for _ in 0..20 {
        env.step(&[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]).unwrap();
    }
    env.reset();
    let after_reset = env.observe();
    assert_eq!(initial, after_reset);
    assert_eq!(env.steps(), 0);

    // identical rollouts after identical resets
    env.step(&[0.2; 8]).unwrap();
    let first = env.observe();
    env.reset();
    env.step(&[0.2; 8]).unwrap();
    assert_eq!(first, env.observe());
}

#[test]
fn test_wrong_action_length_is_rejected() {
    let mut env = laikago_env();
    assert!(env.step(&[0.0; 12]).is_err());
    assert_eq!(env.steps(), 0);
}

#[test]
fn test_first_step_starts_from_nominal_pose() {
    let mut env = laikago_env();
    env.step(&[0.0; 8]).unwrap();

    let ob = env.observation();
    let nominal = LaikagoConfig::nominal_pose();
    for i in 0..8 {
        assert_relative_eq!(ob[4 + i], nominal[7 + i], epsilon = 5e-2);
        assert!(ob[18 + i].abs() < 5.0, "joint {i} rate {}", ob[18 + i]);
    }
}

#[test]
fn test_saturated_actions_stay_within_joint_limits() {
    let mut env = laikago_env();
    let limits: Vec<[f32; 2]> = env
        .mechanism()
        .model()
        .actuated_joints()
        .map(|j| j.limits.unwrap())
        .collect();

    for k in 0..100 {
        let sign = if k % 20 < 10 { 1.0 } else { -1.0 };
        let action: Vec<f64> = (0..8).map(|j| if j % 2 == 0 { 20.0 * sign } else { -20.0 * sign }).collect();
        env.step(&action).unwrap();

        let ob = env.observation();
        for (i, [lower, upper]) in limits.iter().enumerate() {
            let angle = ob[4 + i];
            assert!(
                angle >= *lower as f64 - 0.1 && angle <= *upper as f64 + 0.1,
                "step {k}: joint {i} at {angle} outside [{lower}, {upper}]"
            );
        }
    }
}
