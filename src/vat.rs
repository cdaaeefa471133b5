use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Transaction;

/// One blocking rule: purchases it matches carry non-deductible VAT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VatRule {
    pub name: String,
    /// Whole words looked for in the description, case-insensitive.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Category names the rule applies to regardless of description.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Words that switch the rule off again (e.g. "diesel" for petrol).
    #[serde(default)]
    pub unless_keywords: Vec<String>,
    pub reason: String,
    /// Accommodation for a qualifying conference stays deductible.
    #[serde(default)]
    pub conference_exception: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyFile {
    rules: Vec<VatRule>,
}

#[derive(Debug)]
struct CompiledRule {
    rule: VatRule,
    keywords: Option<Regex>,
    unless: Option<Regex>,
}

/// Extra facts about a purchase that the description cannot carry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VatContext {
    pub qualifying_conference: bool,
    pub personal_use: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VatDecision {
    pub is_deductible: bool,
    pub reason: String,
    pub rule: Option<String>,
}

#[derive(Debug)]
pub struct VatPolicy {
    rules: Vec<CompiledRule>,
}

fn word_regex(words: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)(?:^|[^a-z0-9])(?:{})(?:$|[^a-z0-9])", alternatives.join("|"));
    Ok(Some(Regex::new(&pattern)?))
}

impl VatPolicy {
    pub fn new(rules: Vec<VatRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                Ok(CompiledRule {
                    keywords: word_regex(&rule.keywords)?,
                    unless: word_regex(&rule.unless_keywords)?,
                    rule,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Load a policy table from a JSON file of the form `{"rules": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: PolicyFile = serde_json::from_str(&content)?;
        Self::new(file.rules)
    }

    pub fn rules(&self) -> impl Iterator<Item = &VatRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Decide whether VAT on a purchase can be reclaimed.
    pub fn is_vat_deductible(
        &self,
        description: &str,
        category_name: Option<&str>,
        extra: Option<&VatContext>,
    ) -> VatDecision {
        let context = extra.copied().unwrap_or_default();
        if context.personal_use {
            return VatDecision {
                is_deductible: false,
                reason: "Personal expenditure is not a business input".to_string(),
                rule: None,
            };
        }

        for compiled in &self.rules {
            let rule = &compiled.rule;
            let by_category = category_name.is_some_and(|name| {
                rule.categories.iter().any(|c| c.eq_ignore_ascii_case(name.trim()))
            });
            let by_keyword = compiled
                .keywords
                .as_ref()
                .is_some_and(|re| re.is_match(description));
            if !(by_category || by_keyword) {
                continue;
            }
            if compiled.unless.as_ref().is_some_and(|re| re.is_match(description)) {
                continue;
            }
            if rule.conference_exception && context.qualifying_conference {
                return VatDecision {
                    is_deductible: true,
                    reason: "Accommodation for a qualifying conference".to_string(),
                    rule: Some(rule.name.clone()),
                };
            }
            return VatDecision {
                is_deductible: false,
                reason: rule.reason.clone(),
                rule: Some(rule.name.clone()),
            };
        }

        VatDecision {
            is_deductible: true,
            reason: "Business purchase".to_string(),
            rule: None,
        }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for VatPolicy {
    /// Irish input VAT exclusions (VATCA 2010 s.60(2)).
    fn default() -> Self {
        let rules = vec![
            VatRule {
                name: "food_and_drink".to_string(),
                keywords: words(&[
                    "restaurant", "cafe", "coffee", "lunch", "dinner", "breakfast", "takeaway",
                    "pub", "bar", "deli", "food", "mcdonalds", "starbucks", "costa",
                ]),
                categories: words(&["Subsistence"]),
                unless_keywords: Vec::new(),
                reason: "VAT on food, drink and personal services is not deductible (VATCA 2010 s.60(2)(a)(i))".to_string(),
                conference_exception: false,
            },
            VatRule {
                name: "accommodation".to_string(),
                keywords: words(&["hotel", "b&b", "hostel", "airbnb", "guesthouse", "lodge"]),
                categories: words(&["Accommodation"]),
                unless_keywords: Vec::new(),
                reason: "VAT on accommodation is not deductible (VATCA 2010 s.60(2)(a)(i))".to_string(),
                conference_exception: true,
            },
            VatRule {
                name: "entertainment".to_string(),
                keywords: words(&["entertainment", "tickets", "concert", "golf", "ticketmaster"]),
                categories: words(&["Entertainment"]),
                unless_keywords: Vec::new(),
                reason: "VAT on entertainment is not deductible (VATCA 2010 s.60(2)(a)(iii))".to_string(),
                conference_exception: false,
            },
            VatRule {
                name: "passenger_vehicles".to_string(),
                keywords: words(&["car hire", "car rental", "hertz", "avis", "europcar"]),
                categories: Vec::new(),
                unless_keywords: Vec::new(),
                reason: "VAT on hiring or buying passenger cars is not deductible (VATCA 2010 s.60(2)(a)(iv))".to_string(),
                conference_exception: false,
            },
            VatRule {
                name: "petrol".to_string(),
                keywords: words(&["petrol", "unleaded"]),
                categories: words(&["Motor Fuel"]),
                unless_keywords: words(&["diesel"]),
                reason: "VAT on petrol is not deductible; diesel is (VATCA 2010 s.60(2)(a)(v))".to_string(),
                conference_exception: false,
            },
        ];
        // built from literals, escaped before compiling
        Self::new(rules).unwrap_or(Self { rules: Vec::new() })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VatSummary {
    pub reclaimable: f64,
    pub blocked: f64,
    pub considered: usize,
}

/// VAT on purchases: the deductible VAT of every outflow that has a VAT
/// amount, with the blocked part reported alongside.
pub fn vat_on_purchases(
    policy: &VatPolicy,
    transactions: &[Transaction],
    category_names: &HashMap<i64, String>,
) -> VatSummary {
    let mut summary = VatSummary::default();
    for txn in transactions.iter().filter(|t| t.amount < 0.0) {
        let Some(vat) = txn.vat_amount else {
            continue;
        };
        let category = txn
            .category_id
            .and_then(|id| category_names.get(&id))
            .map(String::as_str);
        summary.considered += 1;
        if policy.is_vat_deductible(&txn.description, category, None).is_deductible {
            summary.reclaimable += vat.abs();
        } else {
            summary.blocked += vat.abs();
        }
    }
    summary.reclaimable = (summary.reclaimable * 100.0).round() / 100.0;
    summary.blocked = (summary.blocked * 100.0).round() / 100.0;
    summary
}
