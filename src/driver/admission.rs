//! Driver Admission
//!
//! Decides whether a driver's sub-controller should currently run. The
//! predicate is pure: identical inputs always produce the same decision, so
//! the supervisor can re-evaluate it on every change notice.

use crate::domain::platform::{DriverObject, FeatureGateSnapshot, PlatformSnapshot, PlatformType};
use crate::driver::config::{Applicability, DriverConfig};
use crate::error::{Error, Result};
use tracing::trace;

/// Evaluate whether `config` should run against the given snapshots.
///
/// Checks short-circuit in this order:
/// 1. a required feature gate that is not enabled vetoes;
/// 2. a platform mismatch vetoes, unless the driver is already installed and
///    carries a status filter (the filter then decides);
/// 3. a status filter has the final word on the platform variant;
/// 4. a tech preview driver whose CSIDriver object exists but is not managed
///    by the operator is a conflict: the user installed their own driver.
///
/// A config naming an unrecognized platform is an error, and so is the
/// conflict in step 4.
pub fn should_run(
    config: &DriverConfig,
    platform: &PlatformSnapshot,
    gates: &FeatureGateSnapshot,
    driver: Option<&DriverObject>,
    already_installed: bool,
) -> Result<bool> {
    let name = config.driver_name.as_str();

    if let Some(gate) = &config.require_feature_gate {
        if !gates.enabled(gate) {
            trace!(driver = %name, gate = %gate, "feature gate disabled");
            return Ok(false);
        }
    }

    if !platform_matches(config, platform)? {
        let sticky = already_installed && config.status_filter.is_some();
        if !sticky {
            trace!(driver = %name, "platform mismatch");
            return Ok(false);
        }
        trace!(driver = %name, "platform mismatch on installed driver, consulting status filter");
    }

    if let Some(filter) = &config.status_filter {
        if !filter.evaluate(platform.platform_status.as_ref(), already_installed) {
            trace!(driver = %name, filter = ?filter, "status filter denied");
            return Ok(false);
        }
    }

    if config.is_tech_preview() {
        if let Some(object) = driver {
            if !object.is_managed() {
                return Err(Error::DriverConflict {
                    driver: name.to_string(),
                });
            }
        }
    }

    Ok(true)
}

fn platform_matches(config: &DriverConfig, platform: &PlatformSnapshot) -> Result<bool> {
    match &config.applicability {
        Applicability::AllPlatforms => Ok(true),
        Applicability::Platform(PlatformType::Unrecognized(other)) => {
            Err(Error::Configuration(format!(
                "driver {} targets unrecognized platform {}",
                config.driver_name, other
            )))
        }
        Applicability::Platform(expected) => Ok(platform.platform_type() == Some(expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::platform::{AzureCloudEnvironment, PlatformStatus};
    use crate::driver::config::StatusFilter;

    const EXAMPLE_GATE: &str = "Example";

    struct Case {
        name: &'static str,
        platform: PlatformSnapshot,
        gates: FeatureGateSnapshot,
        driver: Option<DriverObject>,
        config: DriverConfig,
        installed: bool,
        expect_run: bool,
        expect_error: bool,
    }

    fn default_gates() -> FeatureGateSnapshot {
        FeatureGateSnapshot::new(Vec::<String>::new(), [EXAMPLE_GATE])
    }

    fn tech_preview_gates() -> FeatureGateSnapshot {
        FeatureGateSnapshot::new([EXAMPLE_GATE], Vec::<String>::new())
    }

    fn custom_gates(enabled: &[&str]) -> FeatureGateSnapshot {
        FeatureGateSnapshot::new(enabled.iter().copied(), Vec::<String>::new())
    }

    fn test_driver(platform: Applicability) -> DriverConfig {
        DriverConfig {
            applicability: platform,
            ..DriverConfig::for_all_platforms("csi.test.openshift.io")
        }
        .with_feature_gate(EXAMPLE_GATE)
    }

    fn azure_stack() -> PlatformSnapshot {
        PlatformSnapshot::new(PlatformStatus::azure(AzureCloudEnvironment::StackCloud))
    }

    fn azure_file() -> DriverConfig {
        DriverConfig::for_platform("file.csi.azure.com", PlatformType::Azure)
            .with_status_filter(StatusFilter::NotAzureStackCloud)
    }

    fn cases() -> Vec<Case> {
        vec![
            Case {
                name: "tech preview example driver on AllPlatforms type",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: tech_preview_gates(),
                driver: None,
                config: test_driver(Applicability::AllPlatforms),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview example driver on AWS",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: tech_preview_gates(),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview example driver on GCP",
                platform: PlatformSnapshot::of(PlatformType::GCP),
                gates: tech_preview_gates(),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::GCP)),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview example driver on vSphere",
                platform: PlatformSnapshot::of(PlatformType::VSphere),
                gates: tech_preview_gates(),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::VSphere)),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "GA driver on matching platform",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: default_gates(),
                driver: None,
                config: DriverConfig::for_platform("ebs.csi.aws.com", PlatformType::AWS),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "GA driver on non-matching platform",
                platform: PlatformSnapshot::of(PlatformType::GCP),
                gates: default_gates(),
                driver: None,
                config: DriverConfig::for_platform("ebs.csi.aws.com", PlatformType::AWS),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
            Case {
                name: "GA driver with status filter returning true",
                platform: PlatformSnapshot::of(PlatformType::IBMCloud),
                gates: default_gates(),
                driver: None,
                config: DriverConfig::for_platform("vpc.block.csi.ibm.io", PlatformType::IBMCloud)
                    .with_status_filter(StatusFilter::Always),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "GA driver with status filter returning false",
                platform: PlatformSnapshot::of(PlatformType::IBMCloud),
                gates: default_gates(),
                driver: None,
                config: DriverConfig::for_platform("vpc.block.csi.ibm.io", PlatformType::IBMCloud)
                    .with_status_filter(StatusFilter::Never),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
            Case {
                name: "tech preview driver with positive custom feature gates",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: custom_gates(&["SomeOtherFeatureGate", EXAMPLE_GATE, "YetAnotherGate"]),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview driver with negative custom feature gates",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: custom_gates(&["SomeOtherFeatureGate"]),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
            Case {
                name: "tech preview driver with empty feature gates",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: custom_gates(&[]),
                driver: None,
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
            Case {
                name: "Azure File driver does not start on Azure Stack Hub",
                platform: azure_stack(),
                gates: custom_gates(&[]),
                driver: None,
                config: azure_file(),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
            Case {
                name: "Azure File driver keeps running on Azure Stack Hub once installed",
                platform: azure_stack(),
                gates: custom_gates(&[]),
                driver: None,
                config: azure_file(),
                installed: true,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "Azure File driver on public Azure",
                platform: PlatformSnapshot::new(PlatformStatus::azure(
                    AzureCloudEnvironment::PublicCloud,
                )),
                gates: default_gates(),
                driver: None,
                config: azure_file(),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview driver with operator-managed CSIDriver",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: tech_preview_gates(),
                driver: Some(DriverObject::managed("csi.test.openshift.io")),
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "tech preview driver with third-party CSIDriver",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: tech_preview_gates(),
                driver: Some(DriverObject::new("csi.test.openshift.io")),
                config: test_driver(Applicability::Platform(PlatformType::AWS)),
                installed: false,
                expect_run: false,
                expect_error: true,
            },
            Case {
                name: "GA driver ignores third-party CSIDriver",
                platform: PlatformSnapshot::of(PlatformType::AWS),
                gates: default_gates(),
                driver: Some(DriverObject::new("ebs.csi.aws.com")),
                config: DriverConfig::for_platform("ebs.csi.aws.com", PlatformType::AWS),
                installed: false,
                expect_run: true,
                expect_error: false,
            },
            Case {
                name: "platform specific driver without platform status",
                platform: PlatformSnapshot::default(),
                gates: default_gates(),
                driver: None,
                config: DriverConfig::for_platform("ebs.csi.aws.com", PlatformType::AWS),
                installed: false,
                expect_run: false,
                expect_error: false,
            },
        ]
    }

    #[test]
    fn test_should_run_table() {
        for case in cases() {
            let result = should_run(
                &case.config,
                &case.platform,
                &case.gates,
                case.driver.as_ref(),
                case.installed,
            );
            match result {
                Ok(run) => {
                    assert!(!case.expect_error, "{}: expected an error", case.name);
                    assert_eq!(run, case.expect_run, "{}", case.name);
                }
                Err(e) => assert!(case.expect_error, "{}: unexpected error {}", case.name, e),
            }
        }
    }

    #[test]
    fn test_disabled_gate_vetoes_on_every_platform() {
        let gates = default_gates();
        for platform in [
            PlatformType::AWS,
            PlatformType::GCP,
            PlatformType::Azure,
            PlatformType::None,
        ] {
            let config = test_driver(Applicability::Platform(platform.clone()))
                .with_status_filter(StatusFilter::Always);
            let snapshot = PlatformSnapshot::of(platform);
            assert!(!should_run(&config, &snapshot, &gates, None, true).unwrap());
        }
    }

    #[test]
    fn test_all_platforms_without_gate_always_runs() {
        let config = DriverConfig::for_all_platforms("csi.sharedresource.openshift.io");
        for platform in ["AWS", "Azure", "GCP", "VSphere", "BareMetal", "None", "Kubevirt"] {
            let snapshot = PlatformSnapshot::of(PlatformType::from(platform));
            assert!(should_run(&config, &snapshot, &default_gates(), None, false).unwrap());
        }
        assert!(should_run(
            &config,
            &PlatformSnapshot::default(),
            &default_gates(),
            None,
            false
        )
        .unwrap());
    }

    #[test]
    fn test_sticky_install_flips_decision() {
        let config = azure_file();
        let platform = azure_stack();
        let gates = default_gates();

        assert!(!should_run(&config, &platform, &gates, None, false).unwrap());
        assert!(should_run(&config, &platform, &gates, None, true).unwrap());
    }

    #[test]
    fn test_status_filter_consulted_on_mismatch_when_installed() {
        let allow = DriverConfig::for_platform("vpc.block.csi.ibm.io", PlatformType::IBMCloud)
            .with_status_filter(StatusFilter::Always);
        let deny = allow.clone().with_status_filter(StatusFilter::Never);
        let gcp = PlatformSnapshot::of(PlatformType::GCP);
        let gates = default_gates();

        assert!(!should_run(&allow, &gcp, &gates, None, false).unwrap());
        assert!(should_run(&allow, &gcp, &gates, None, true).unwrap());
        assert!(!should_run(&deny, &gcp, &gates, None, true).unwrap());
    }

    #[test]
    fn test_unrecognized_config_platform_is_error() {
        let config =
            DriverConfig::for_platform("csi.example.io", PlatformType::from("Kubevirt"));
        let result = should_run(
            &config,
            &PlatformSnapshot::of(PlatformType::AWS),
            &default_gates(),
            None,
            false,
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_gate_check_precedes_config_error() {
        let config = DriverConfig::for_platform("csi.example.io", PlatformType::from("Kubevirt"))
            .with_feature_gate(EXAMPLE_GATE);
        let result = should_run(
            &config,
            &PlatformSnapshot::of(PlatformType::AWS),
            &default_gates(),
            None,
            false,
        );
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_third_party_driver_is_conflict() {
        let config = test_driver(Applicability::AllPlatforms);
        let result = should_run(
            &config,
            &PlatformSnapshot::of(PlatformType::AWS),
            &tech_preview_gates(),
            Some(&DriverObject::new("csi.test.openshift.io")),
            false,
        );
        assert!(matches!(
            result,
            Err(Error::DriverConflict { ref driver }) if driver == "csi.test.openshift.io"
        ));

        // A disabled gate vetoes before the conflict is looked at
        let result = should_run(
            &config,
            &PlatformSnapshot::of(PlatformType::AWS),
            &default_gates(),
            Some(&DriverObject::new("csi.test.openshift.io")),
            false,
        );
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_deterministic() {
        let config = azure_file();
        let platform = azure_stack();
        let gates = default_gates();
        let first = should_run(&config, &platform, &gates, None, true).unwrap();
        for _ in 0..10 {
            assert_eq!(
                should_run(&config, &platform, &gates, None, true).unwrap(),
                first
            );
        }
    }
}
