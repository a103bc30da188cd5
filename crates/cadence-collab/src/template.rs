//! Deterministic task generator that needs no external service

use async_trait::async_trait;
use tracing::debug;

use crate::{
    Category, CollabError, CollabResult, Evidence, GenerationRequest, Level, TaskGenerator,
    TaskProposal,
};

/// Rough size of one planned task
pub const MINUTES_PER_TASK: u32 = 30;

/// Derives proposals from the goal, the focus weights and the snapshot's files.
///
/// Categories are allotted by the D'Hondt method over the non-zero weights, so
/// a heavier weight gets proportionally more tasks and ties go to the earlier
/// category (bugs, then features, then refactor).
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    max_tasks: usize,
    evidence_per_task: usize,
}

impl TemplateGenerator {
    pub fn new(max_tasks: usize, evidence_per_task: usize) -> Self {
        Self {
            max_tasks: max_tasks.max(1),
            evidence_per_task,
        }
    }
}

#[async_trait]
impl TaskGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<Vec<TaskProposal>> {
        let files = &request.snapshot.files;
        if files.len() < self.evidence_per_task {
            return Err(CollabError::Generation(format!(
                "workspace has {} files, {} needed as evidence",
                files.len(),
                self.evidence_per_task
            )));
        }

        let count = ((request.time_budget_minutes / MINUTES_PER_TASK) as usize).clamp(1, self.max_tasks);
        let categories = allot_categories(request, count);

        let proposals = categories
            .into_iter()
            .enumerate()
            .map(|(i, category)| {
                let evidence: Vec<Evidence> = (0..self.evidence_per_task)
                    .map(|j| Evidence {
                        path: files[(i * self.evidence_per_task + j) % files.len()]
                            .to_string_lossy()
                            .into_owned(),
                        line: None,
                        note: format!("Relevant to {}", category),
                    })
                    .collect();
                render(request, category, i, count, evidence)
            })
            .collect::<Vec<_>>();

        debug!(count = proposals.len(), "Template proposals generated");
        Ok(proposals)
    }
}

fn allot_categories(request: &GenerationRequest, count: usize) -> Vec<Category> {
    let mut weighted: Vec<(Category, f64)> = [
        (Category::Bug, request.focus.bugs),
        (Category::Feature, request.focus.features),
        (Category::Refactor, request.focus.refactor),
    ]
    .into_iter()
    .filter(|(_, w)| *w > 0.0)
    .collect();

    // All weights zero: spread evenly
    if weighted.is_empty() {
        weighted = vec![
            (Category::Bug, 1.0),
            (Category::Feature, 1.0),
            (Category::Refactor, 1.0),
        ];
    }

    let mut assigned = vec![0usize; weighted.len()];
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let mut best = 0;
        let mut best_quotient = f64::MIN;
        for (idx, (_, weight)) in weighted.iter().enumerate() {
            let quotient = weight / (assigned[idx] + 1) as f64;
            if quotient > best_quotient {
                best = idx;
                best_quotient = quotient;
            }
        }
        assigned[best] += 1;
        out.push(weighted[best].0);
    }
    out
}

fn render(
    request: &GenerationRequest,
    category: Category,
    index: usize,
    count: usize,
    evidence: Vec<Evidence>,
) -> TaskProposal {
    let focus = evidence
        .first()
        .map(|e| e.path.clone())
        .unwrap_or_default();

    let (verb, impact, effort, risk) = match category {
        Category::Bug => ("Fix defects", Level::High, Level::Medium, Level::Low),
        Category::Feature => ("Build", Level::High, Level::High, Level::Medium),
        _ => ("Clean up", Level::Medium, Level::Medium, Level::Low),
    };

    TaskProposal {
        title: format!("{} around {}", verb, focus),
        description: format!(
            "Step {} of {} toward \"{}\": {} work starting from {}.",
            index + 1,
            count,
            request.goal,
            category,
            focus
        ),
        category,
        impact,
        effort,
        risk,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{validate_proposals, Snapshot};
    use cadence_api::FocusWeights;
    use cadence_util::WorkspaceId;
    use std::path::PathBuf;

    fn request(minutes: u32, focus: FocusWeights, files: usize) -> GenerationRequest {
        GenerationRequest {
            snapshot: Snapshot {
                workspace_id: WorkspaceId::from("ws"),
                root: PathBuf::from("/tmp/ws"),
                file_count: files as u64,
                total_bytes: 0,
                files: (0..files).map(|i| PathBuf::from(format!("src/m{}.rs", i))).collect(),
                taken_at: cadence_util::now(),
            },
            goal: "fix bug".into(),
            time_budget_minutes: minutes,
            focus,
        }
    }

    #[tokio::test]
    async fn one_task_per_half_hour() {
        let generator = TemplateGenerator::new(12, 2);
        let proposals = generator
            .generate(&request(60, FocusWeights::new(1.0, 0.0, 0.0), 5))
            .await
            .unwrap();

        assert_eq!(proposals.len(), 2);
        assert!(proposals.iter().all(|p| p.category == Category::Bug));
        assert!(validate_proposals(&proposals, 2, 12).is_ok());
    }

    #[tokio::test]
    async fn small_budget_still_yields_one_task_and_cap_applies() {
        let generator = TemplateGenerator::new(3, 2);

        let few = generator
            .generate(&request(15, FocusWeights::new(0.5, 0.5, 0.5), 2))
            .await
            .unwrap();
        assert_eq!(few.len(), 1);

        let capped = generator
            .generate(&request(480, FocusWeights::new(0.5, 0.5, 0.5), 2))
            .await
            .unwrap();
        assert_eq!(capped.len(), 3);
    }

    #[tokio::test]
    async fn categories_follow_weights() {
        let generator = TemplateGenerator::new(12, 2);
        let proposals = generator
            .generate(&request(180, FocusWeights::new(0.0, 1.0, 0.5), 4))
            .await
            .unwrap();

        let features = proposals.iter().filter(|p| p.category == Category::Feature).count();
        let refactors = proposals.iter().filter(|p| p.category == Category::Refactor).count();
        assert_eq!(proposals.len(), 6);
        assert_eq!(features, 4);
        assert_eq!(refactors, 2);
        assert_eq!(proposals[0].category, Category::Feature);
    }

    #[tokio::test]
    async fn too_few_files_is_generation_error() {
        let generator = TemplateGenerator::new(12, 2);
        let result = generator
            .generate(&request(60, FocusWeights::new(1.0, 0.0, 0.0), 1))
            .await;
        assert!(matches!(result, Err(CollabError::Generation(_))));
    }
}
