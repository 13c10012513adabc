// Migration profiles: the named rule set a job runs with
//
// A profile is plain data (serde round-trippable) so operators can
// keep site-specific profiles as JSON next to the lookup CSVs. The
// built-in ipd_visit profile encodes the standard hospital IPD
// migration.

use serde::{Deserialize, Serialize};

use super::rules::{CalculatedFn, Operation, TransformRule};

/// Ordered rule set plus destination table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProfile {
    pub name: String,
    pub target_table: String,
    pub rules: Vec<TransformRule>,
}

impl MigrationProfile {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Reject profiles that cannot work before a job starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rules.is_empty() {
            anyhow::bail!("profile {} declares no rules", self.name);
        }
        if self.target_table.trim().is_empty() {
            anyhow::bail!("profile {} has an empty target table", self.name);
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.target.as_str()) {
                anyhow::bail!(
                    "profile {}: duplicate target column {}",
                    self.name,
                    rule.target
                );
            }
        }

        Ok(())
    }

    /// The standard inpatient-visit migration: PII hashed, dates
    /// normalized, administrative divisions resolved to names, fiscal
    /// year derived from the discharge date.
    pub fn ipd_visit(fiscal_year_start_month: u32) -> Self {
        let passthrough = |source: &str, target: &str| TransformRule {
            name: format!("copy-{}", target),
            source: source.to_string(),
            operation: Operation::Passthrough,
            target: target.to_string(),
            required: false,
        };

        Self {
            name: "ipd_visit".to_string(),
            target_table: "ipd_visit".to_string(),
            rules: vec![
                TransformRule {
                    name: "hash-hn".to_string(),
                    source: "HN".to_string(),
                    operation: Operation::Hash,
                    target: "hn_hash".to_string(),
                    required: true,
                },
                TransformRule {
                    name: "hash-cid".to_string(),
                    source: "CID".to_string(),
                    operation: Operation::Hash,
                    target: "cid_hash".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "hash-name".to_string(),
                    source: "NAME".to_string(),
                    operation: Operation::Hash,
                    target: "name_hash".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "admit-date".to_string(),
                    source: "DATEADM".to_string(),
                    operation: Operation::DateFormat,
                    target: "admit_date".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "discharge-date".to_string(),
                    source: "DATEDSC".to_string(),
                    operation: Operation::DateFormat,
                    target: "discharge_date".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "changwat-name".to_string(),
                    source: "CHANGWAT".to_string(),
                    operation: Operation::Lookup {
                        table: "changwat".to_string(),
                    },
                    target: "changwat_name".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "amphur-name".to_string(),
                    source: "AMPHUR".to_string(),
                    operation: Operation::Lookup {
                        table: "amphur".to_string(),
                    },
                    target: "amphur_name".to_string(),
                    required: false,
                },
                TransformRule {
                    name: "fiscal-year".to_string(),
                    source: "DATEDSC".to_string(),
                    operation: Operation::Calculated {
                        function: CalculatedFn::FiscalYear {
                            start_month: fiscal_year_start_month,
                        },
                    },
                    target: "byear".to_string(),
                    required: false,
                },
                passthrough("SEX", "sex"),
                passthrough("AGE", "age"),
                passthrough("WARD", "ward"),
                passthrough("PDX", "pdx"),
                passthrough("LOS", "los"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipd_visit_profile_is_valid() {
        let profile = MigrationProfile::ipd_visit(10);
        profile.validate().unwrap();
        assert_eq!(profile.target_table, "ipd_visit");
        assert!(profile.rules.iter().any(|r| r.target == "byear"));
        assert!(profile
            .rules
            .iter()
            .find(|r| r.target == "hn_hash")
            .unwrap()
            .required);
    }

    #[test]
    fn test_profile_json_round_trip() {
        let profile = MigrationProfile::ipd_visit(10);
        let json = profile.to_json().unwrap();
        let back = MigrationProfile::from_json(&json).unwrap();

        assert_eq!(back.name, profile.name);
        assert_eq!(back.rules.len(), profile.rules.len());
        for (a, b) in back.rules.iter().zip(profile.rules.iter()) {
            assert_eq!(a.operation, b.operation);
            assert_eq!(a.target, b.target);
            assert_eq!(a.required, b.required);
        }
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mut profile = MigrationProfile::ipd_visit(10);
        let mut duplicate = profile.rules[0].clone();
        duplicate.name = "dup".to_string();
        profile.rules.push(duplicate);

        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_empty_profile_rejected() {
        let profile = MigrationProfile {
            name: "empty".to_string(),
            target_table: "t".to_string(),
            rules: Vec::new(),
        };
        assert!(profile.validate().is_err());
    }
}
