use ipeps_fullupdate::{
    CgOptions, ConfigError, FullUpdateOptions, NormalizationPolicy, PreconditionerKind,
    RegularizationOptions, ResidualNorm, SingularPolicy, Strategy,
};

#[test]
fn test_parse_strategies() {
    let cases = [
        ("als", Strategy::AlsPseudoInverse),
        ("ALS-PINV", Strategy::AlsPseudoInverse),
        ("als-bicg", Strategy::AlsBicg),
        ("joint-cg", Strategy::JointConjugateGradient),
        (" direct ", Strategy::DirectPseudoInverse),
    ];
    for (s, expected) in cases {
        assert_eq!(s.parse::<Strategy>().unwrap(), expected, "parsing {s:?}");
    }
    assert_eq!(
        "newton".parse::<Strategy>().unwrap_err(),
        ConfigError::UnknownStrategy("newton".to_string())
    );
}

#[test]
fn test_parse_normalization_policies() {
    let cases = [
        ("NONE", NormalizationPolicy::None),
        ("BLE", NormalizationPolicy::SqrtMaxElement),
        ("sqrt-max-element", NormalizationPolicy::SqrtMaxElement),
        ("PTN3", NormalizationPolicy::CostPower),
        ("BALANCE", NormalizationPolicy::GlobalBalance),
    ];
    for (s, expected) in cases {
        assert_eq!(s.parse::<NormalizationPolicy>().unwrap(), expected);
    }
    assert!(matches!(
        "PTN2".parse::<NormalizationPolicy>(),
        Err(ConfigError::UnknownNormalization(s)) if s == "PTN2"
    ));
}

#[test]
fn test_parse_solver_choices() {
    assert_eq!("unit".parse::<SingularPolicy>().unwrap(), SingularPolicy::Unit);
    assert_eq!("linf".parse::<ResidualNorm>().unwrap(), ResidualNorm::MaxAbs);
    assert_eq!(
        "jacobi".parse::<PreconditionerKind>().unwrap(),
        PreconditionerKind::Diagonal
    );
    assert!(matches!(
        "ilu".parse::<PreconditionerKind>(),
        Err(ConfigError::UnknownChoice {
            kind: "preconditioner",
            ..
        })
    ));
}

#[test]
fn test_validate_rejects_bad_values() {
    let invalid_name = |opts: FullUpdateOptions| match opts.validate() {
        Err(ConfigError::InvalidValue { name, .. }) => name,
        other => panic!("expected InvalidValue, got {other:?}"),
    };

    assert_eq!(
        invalid_name(FullUpdateOptions::default().with_fdistance_eps(0.0)),
        "fdistance_eps"
    );
    assert_eq!(
        invalid_name(FullUpdateOptions::default().with_fdistance_eps(f64::NAN)),
        "fdistance_eps"
    );
    assert_eq!(
        invalid_name(FullUpdateOptions::default().with_max_sweeps(0)),
        "max_sweeps"
    );
    assert_eq!(
        invalid_name(FullUpdateOptions::default().with_max_bond_dim(0)),
        "max_bond_dim"
    );
    assert_eq!(
        invalid_name(
            FullUpdateOptions::default()
                .with_regularization(RegularizationOptions::default().with_eigen_cutoff(1.5))
        ),
        "regularization.eigen_cutoff"
    );
    assert_eq!(
        invalid_name(
            FullUpdateOptions::default().with_cg(CgOptions::default().with_gradient_tol(-1.0))
        ),
        "cg.gradient_tol"
    );
    assert!(FullUpdateOptions::default().validate().is_ok());
}

#[test]
fn test_config_error_messages() {
    let err = ConfigError::UnsupportedTopology("loop of four sites".to_string());
    assert_eq!(
        err.to_string(),
        "unsupported cluster topology: loop of four sites"
    );
    assert_eq!(
        ConfigError::UnknownNormalization("x".to_string()).to_string(),
        "unknown normalization policy 'x'"
    );
}
