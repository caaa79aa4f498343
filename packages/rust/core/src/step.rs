//! The fixed pipeline step sequence and the run configuration built from the CLI.

use std::fmt;

use khub_shared::{KhubError, Result};

/// One stage of the knowledge pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStep {
    KnowledgeCrawling,
    KnowledgeProcessing,
    KnowledgeExporting,
    KnowledgeMapping,
    KnowledgeImporting,
    OntologyImporting,
    ContentExtracting,
    ContentMapping,
    ContentImporting,
    KnowledgeGraphEnriching,
}

impl PipelineStep {
    /// Every step, in execution order.
    pub const ALL: [PipelineStep; 10] = [
        PipelineStep::KnowledgeCrawling,
        PipelineStep::KnowledgeProcessing,
        PipelineStep::KnowledgeExporting,
        PipelineStep::KnowledgeMapping,
        PipelineStep::KnowledgeImporting,
        PipelineStep::OntologyImporting,
        PipelineStep::ContentExtracting,
        PipelineStep::ContentMapping,
        PipelineStep::ContentImporting,
        PipelineStep::KnowledgeGraphEnriching,
    ];

    /// Zero-based position in [`PipelineStep::ALL`].
    pub fn position(self) -> usize {
        self as usize
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PipelineStep::KnowledgeCrawling => "Knowledge Crawling",
            PipelineStep::KnowledgeProcessing => "Knowledge Processing",
            PipelineStep::KnowledgeExporting => "Knowledge Exporting",
            PipelineStep::KnowledgeMapping => "Knowledge Mapping",
            PipelineStep::KnowledgeImporting => "Knowledge Importing",
            PipelineStep::OntologyImporting => "Ontology Importing",
            PipelineStep::ContentExtracting => "Content Extracting",
            PipelineStep::ContentMapping => "Content Mapping",
            PipelineStep::ContentImporting => "Content Importing",
            PipelineStep::KnowledgeGraphEnriching => "Knowledge Graph Enriching",
        }
    }

    /// First letter of each word of the display name, e.g. `KC`.
    pub fn initials(self) -> String {
        self.display_name()
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .collect()
    }

    /// Kebab-case name used for `[stages.<slug>]` config sections.
    pub fn slug(self) -> String {
        self.display_name().to_lowercase().replace(' ', "-")
    }

    /// Whether the step runs an external `[stages.<slug>]` command.
    pub fn runs_command(self) -> bool {
        !matches!(
            self,
            PipelineStep::KnowledgeCrawling | PipelineStep::KnowledgeExporting
        )
    }

    /// Slugs of every step that reads a `[stages.<slug>]` section.
    pub fn command_slugs() -> Vec<String> {
        Self::ALL
            .into_iter()
            .filter(|step| step.runs_command())
            .map(PipelineStep::slug)
            .collect()
    }

    /// Resolve initials case-insensitively.
    pub fn from_initials(initials: &str) -> Option<PipelineStep> {
        let wanted = initials.trim();
        Self::ALL
            .into_iter()
            .find(|step| step.initials().eq_ignore_ascii_case(wanted))
    }

    /// The step that follows this one, if any.
    pub fn next(self) -> Option<PipelineStep> {
        Self::ALL.get(self.position() + 1).copied()
    }

    /// Human-readable list of every step, one per line.
    pub fn catalog() -> String {
        Self::ALL
            .iter()
            .map(|step| format!("  {:<4} {}", step.initials(), step.display_name()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Where a run starts and whether it continues past the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRunConfig {
    entry: PipelineStep,
    run_all: bool,
}

impl Default for PipelineRunConfig {
    fn default() -> Self {
        Self {
            entry: PipelineStep::KnowledgeCrawling,
            run_all: true,
        }
    }
}

impl PipelineRunConfig {
    pub fn new(entry: PipelineStep, run_all: bool) -> Self {
        Self { entry, run_all }
    }

    /// Build from the `--run <INITIALS>` / `--only` pair.
    pub fn from_initials(initials: Option<&str>, only: bool) -> Result<Self> {
        let Some(initials) = initials else {
            if only {
                return Err(KhubError::validation("--only requires --run <INITIALS>"));
            }
            return Ok(Self::default());
        };

        let entry = PipelineStep::from_initials(initials).ok_or_else(|| {
            KhubError::validation(format!(
                "unknown step `{initials}`, available steps:\n{}",
                PipelineStep::catalog()
            ))
        })?;

        Ok(Self::new(entry, !only))
    }

    pub fn entry(&self) -> PipelineStep {
        self.entry
    }

    pub fn run_all(&self) -> bool {
        self.run_all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn in_process_steps_take_no_stage_command() {
        let slugs = PipelineStep::command_slugs();
        assert_eq!(slugs.len(), 8);
        assert!(slugs.contains(&"knowledge-processing".to_string()));
        assert!(slugs.contains(&"knowledge-graph-enriching".to_string()));
        assert!(!slugs.contains(&"knowledge-crawling".to_string()));
        assert!(!slugs.contains(&"knowledge-exporting".to_string()));
    }

    #[test]
    fn initials_are_unique() {
        let initials: HashSet<String> = PipelineStep::ALL.iter().map(|s| s.initials()).collect();
        assert_eq!(initials.len(), PipelineStep::ALL.len());
    }

    #[test]
    fn initials_resolve_case_insensitively() {
        assert_eq!(PipelineStep::from_initials("KC"), Some(PipelineStep::KnowledgeCrawling));
        assert_eq!(PipelineStep::from_initials("ke"), Some(PipelineStep::KnowledgeExporting));
        assert_eq!(
            PipelineStep::from_initials("kGe"),
            Some(PipelineStep::KnowledgeGraphEnriching)
        );
        assert_eq!(PipelineStep::from_initials("XX"), None);
    }

    #[test]
    fn every_step_round_trips_through_initials() {
        for step in PipelineStep::ALL {
            assert_eq!(PipelineStep::from_initials(&step.initials()), Some(step));
        }
    }

    #[test]
    fn positions_follow_sequence() {
        for (index, step) in PipelineStep::ALL.iter().enumerate() {
            assert_eq!(step.position(), index);
        }
        assert_eq!(PipelineStep::KnowledgeCrawling.next(), Some(PipelineStep::KnowledgeProcessing));
        assert_eq!(PipelineStep::KnowledgeGraphEnriching.next(), None);
    }

    #[test]
    fn slugs_are_kebab_case() {
        assert_eq!(PipelineStep::KnowledgeMapping.slug(), "knowledge-mapping");
        assert_eq!(PipelineStep::KnowledgeGraphEnriching.slug(), "knowledge-graph-enriching");
    }

    #[test]
    fn run_config_from_arguments() {
        assert_eq!(
            PipelineRunConfig::from_initials(None, false).unwrap(),
            PipelineRunConfig::default()
        );

        let only = PipelineRunConfig::from_initials(Some("ci"), true).unwrap();
        assert_eq!(only.entry(), PipelineStep::ContentImporting);
        assert!(!only.run_all());

        let err = PipelineRunConfig::from_initials(Some("ZZ"), false).unwrap_err();
        assert!(err.to_string().contains("Knowledge Crawling"));

        assert!(PipelineRunConfig::from_initials(None, true).is_err());
    }
}
