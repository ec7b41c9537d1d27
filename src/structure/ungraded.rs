use crate::config::FilterConfig;
use crate::error::Result;
use crate::structure::course_structure::{short_block_id, ContentNode, CourseStructure};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UngradedProblem {
    pub name: String,
    pub id: String,
}

/// Problems grouped under the display name of the vertical that holds them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    pub problems: Vec<UngradedProblem>,
}

#[derive(Debug, Clone, Default)]
pub struct UngradedProblems {
    sections: Vec<Section>,
    by_name: HashMap<String, usize>,
}

impl UngradedProblems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sections keep first-seen order; a repeated name appends to the
    /// existing section.
    pub fn add(&mut self, section: &str, problem: UngradedProblem) {
        let index = match self.by_name.get(section) {
            Some(&index) => index,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    problems: Vec::new(),
                });
                self.by_name
                    .insert(section.to_string(), self.sections.len() - 1);
                self.sections.len() - 1
            }
        };
        self.sections[index].problems.push(problem);
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.by_name.get(name).map(|&i| &self.sections[i])
    }

    pub fn problem_count(&self) -> usize {
        self.sections.iter().map(|s| s.problems.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn problem_ids(&self) -> HashSet<String> {
        self.sections
            .iter()
            .flat_map(|s| s.problems.iter().map(|p| p.id.clone()))
            .collect()
    }
}

pub struct SectionFilter {
    exclude_patterns: Vec<Regex>,
}

impl SectionFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let exclude_patterns = config
            .exclude_sections
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { exclude_patterns })
    }

    pub fn is_excluded(&self, section: &str) -> bool {
        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.is_match(section))
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TraversalStatistics {
    pub containers: usize,
    pub graded_containers: usize,
    pub verticals_visited: usize,
    pub problems_found: usize,
    pub excluded_problems: usize,
}

impl TraversalStatistics {
    pub fn display_summary(&self) -> String {
        format!(
            "Traversal:\n  Containers: {} ({} graded)\n  Verticals visited: {}\n  Ungraded problems: {}\n  Excluded by section filter: {}\n",
            self.containers,
            self.graded_containers,
            self.verticals_visited,
            self.problems_found,
            self.excluded_problems
        )
    }
}

/// Walks the course tree: ungraded container → vertical → problem.
pub struct UngradedFinder {
    container_category: String,
    problem_category: String,
    graded_marker: String,
    filter: SectionFilter,
}

impl UngradedFinder {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            container_category: config.container_category.clone(),
            problem_category: config.problem_category.clone(),
            graded_marker: config.graded_marker.clone(),
            filter: SectionFilter::new(config)?,
        })
    }

    pub fn find(&self, structure: &CourseStructure) -> Result<UngradedProblems> {
        self.find_with_statistics(structure).map(|(found, _)| found)
    }

    pub fn find_with_statistics(
        &self,
        structure: &CourseStructure,
    ) -> Result<(UngradedProblems, TraversalStatistics)> {
        let mut found = UngradedProblems::new();
        let mut stats = TraversalStatistics::default();

        for (container_id, container) in structure.iter() {
            if !container.is_category(&self.container_category) {
                continue;
            }
            stats.containers += 1;

            if container.has_metadata_key(&self.graded_marker) {
                stats.graded_containers += 1;
                continue;
            }

            for vertical_id in &container.children {
                let vertical = structure.child(container_id, vertical_id)?;
                stats.verticals_visited += 1;
                self.add_from_vertical(structure, vertical_id, vertical, &mut found, &mut stats)?;
            }
        }

        tracing::debug!(
            containers = stats.containers,
            graded = stats.graded_containers,
            problems = stats.problems_found,
            "course structure traversed"
        );

        Ok((found, stats))
    }

    fn add_from_vertical(
        &self,
        structure: &CourseStructure,
        vertical_id: &str,
        vertical: &ContentNode,
        found: &mut UngradedProblems,
        stats: &mut TraversalStatistics,
    ) -> Result<()> {
        let section = node_name(vertical_id, vertical);

        for child_id in &vertical.children {
            let child = structure.child(vertical_id, child_id)?;
            if !child.is_category(&self.problem_category) {
                continue;
            }

            if self.filter.is_excluded(section) {
                stats.excluded_problems += 1;
                continue;
            }

            stats.problems_found += 1;
            found.add(
                section,
                UngradedProblem {
                    name: node_name(child_id, child).to_string(),
                    id: child_id.clone(),
                },
            );
        }

        Ok(())
    }
}

fn node_name<'a>(id: &'a str, node: &'a ContentNode) -> &'a str {
    node.display_name().unwrap_or_else(|| short_block_id(id))
}
