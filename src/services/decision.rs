use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneChoice {
    Extend,
    WrapUp,
}

/// Questions the pipeline needs a human for mid-operation.
pub trait DecisionMaker: Send + Sync {
    fn milestone(&self, progress: u32, total_chapters: u32) -> MilestoneChoice;
    fn auto_fix(&self, issues: &str) -> bool;
}

/// Asks on the terminal.
pub struct PromptDecisions;

impl DecisionMaker for PromptDecisions {
    fn milestone(&self, progress: u32, total_chapters: u32) -> MilestoneChoice {
        let question = format!(
            "The novel is {}% of its target ({} chapters planned). Extend it with more chapters?",
            progress, total_chapters
        );
        match inquire::Confirm::new(&question)
            .with_default(true)
            .with_help_message("No wraps the story up within the next few chapters")
            .prompt()
        {
            Ok(true) => MilestoneChoice::Extend,
            Ok(false) => MilestoneChoice::WrapUp,
            Err(e) => {
                warn!("Milestone prompt failed ({}), extending", e);
                MilestoneChoice::Extend
            }
        }
    }

    fn auto_fix(&self, issues: &str) -> bool {
        println!("Consistency issues:\n{}", issues);
        inquire::Confirm::new("Attempt automatic fixes?")
            .with_default(false)
            .prompt()
            .unwrap_or(false)
    }
}

/// Fixed answers for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecisions {
    pub milestone: MilestoneChoice,
    pub auto_fix: bool,
}

impl Default for FixedDecisions {
    fn default() -> Self {
        Self {
            milestone: MilestoneChoice::Extend,
            auto_fix: false,
        }
    }
}

impl DecisionMaker for FixedDecisions {
    fn milestone(&self, _progress: u32, _total_chapters: u32) -> MilestoneChoice {
        self.milestone
    }

    fn auto_fix(&self, _issues: &str) -> bool {
        self.auto_fix
    }
}
