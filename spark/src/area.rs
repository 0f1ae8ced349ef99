//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use regex::{Regex, RegexBuilder};

use crate::config::AreaConfig;

// Area adopted by both peers when neither side carries area configuration.
pub const DEFAULT_AREA_ID: &str = "0";

// Compiled area rules.
//
// Expressions are case-insensitive and anchored to the full string, so a
// rule written as `RSW.*` matches `rsw001` but not `xrsw001`.
#[derive(Debug)]
pub struct AreaMatcher {
    rules: Vec<AreaRule>,
}

#[derive(Debug)]
struct AreaRule {
    area_id: String,
    neighbor_regexes: Vec<Regex>,
    interface_regexes: Vec<Regex>,
}

// ===== impl AreaMatcher =====

impl AreaMatcher {
    pub fn new(config: &[AreaConfig]) -> Result<AreaMatcher, regex::Error> {
        let mut rules = Vec::with_capacity(config.len());
        for area in config {
            rules.push(AreaRule {
                area_id: area.area_id.clone(),
                neighbor_regexes: compile(&area.neighbor_regexes)?,
                interface_regexes: compile(&area.interface_regexes)?,
            });
        }

        Ok(AreaMatcher { rules })
    }

    // Computes the candidate area for the given peer on the given interface.
    //
    // Without any configured rules every peer lands in the default area.
    // With rules, the first one matching both the peer name and the
    // interface name wins; `None` means the peer fits no area and
    // negotiation cannot succeed.
    pub fn match_area(
        &self,
        neighbor_name: &str,
        ifname: &str,
    ) -> Option<&str> {
        if self.rules.is_empty() {
            return Some(DEFAULT_AREA_ID);
        }

        self.rules
            .iter()
            .find(|rule| {
                rule.neighbor_regexes
                    .iter()
                    .any(|regex| regex.is_match(neighbor_name))
                    && rule
                        .interface_regexes
                        .iter()
                        .any(|regex| regex.is_match(ifname))
            })
            .map(|rule| rule.area_id.as_str())
    }
}

// ===== helper functions =====

fn compile(exprs: &[String]) -> Result<Vec<Regex>, regex::Error> {
    exprs
        .iter()
        .map(|expr| {
            RegexBuilder::new(&format!("^(?:{expr})$"))
                .case_insensitive(true)
                .build()
        })
        .collect()
}

// ===== tests =====
