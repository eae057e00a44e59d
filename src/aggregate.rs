//! Statistical aggregation of judge verdicts.
//!
//! Everything here is pure: records in, summary out. Variance is population
//! variance over the judges of one iteration, and agreement maps it onto
//! [0, 1] with `max(0, 1 - var / 25)`, so unanimous judges score 1.0 and a
//! 0-versus-10 split scores 0.0.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::judge::{Criterion, EvaluationRecord};

/// A criterion is flagged controversial when its mean per-iteration variance
/// across multi-judge iterations exceeds this. The same bound flags an
/// iteration whose overall scores spread wider than it.
pub const CONTROVERSY_THRESHOLD: f64 = 2.0;

const TOP_THEMES: usize = 5;
const MAX_PRIORITY_IMPROVEMENTS: usize = 10;

// =============================================================================
// Summary types
// =============================================================================

/// Aggregated verdicts for one (model, task) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task: String,
    pub model: String,
    pub iterations_evaluated: usize,
    /// Mean overall score per iteration, in iteration order.
    pub score_progression: Vec<f64>,
    /// Last minus first entry of the progression.
    pub total_improvement: f64,
    pub final_score: f64,
    /// 1-based iteration with the highest mean overall score; ties go to the
    /// earliest iteration.
    pub best_iteration: u32,
    /// 1-based iteration with the lowest mean overall score.
    pub worst_iteration: u32,
    /// Mean score per criterion over every record.
    pub criterion_averages: BTreeMap<String, f64>,
    /// Mean score per criterion per iteration, in iteration order.
    pub criterion_progression: BTreeMap<String, Vec<f64>>,
    /// Last minus first entry of each criterion's progression, 0.0 for a
    /// single-iteration run.
    pub criteria_improvements: BTreeMap<String, f64>,
    /// Mean per-iteration agreement, 1.0 when no iteration had multiple judges.
    pub judge_agreement: f64,
    /// Criteria the judges kept disagreeing on: mean per-iteration variance
    /// over multi-judge iterations above the controversy threshold.
    pub controversial_criteria: Vec<String>,
    /// Iterations whose judges spread wider than the controversy threshold.
    pub controversial_iterations: Vec<u32>,
    pub top_strengths: Vec<String>,
    pub top_weaknesses: Vec<String>,
    /// Deduplicated suggestions from the final iteration only.
    pub priority_improvements: Vec<String>,
}

/// One model's row in the cross-task overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOverview {
    pub model: String,
    pub tasks_evaluated: usize,
    pub average_final_score: f64,
    pub average_improvement: f64,
    pub best_task: Option<String>,
    pub worst_task: Option<String>,
}

/// One task's row in the difficulty ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDifficulty {
    pub task: String,
    pub average_final_score: f64,
    pub models_evaluated: usize,
}

/// Whole-run overview across every model and task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Ranked best first by mean final score.
    pub models: Vec<ModelOverview>,
    /// Ranked hardest first by mean final score across models.
    pub task_difficulty: Vec<TaskDifficulty>,
}

// =============================================================================
// Aggregation
// =============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Rank themes by exact-string frequency; ties keep first-seen order.
fn top_by_frequency(items: impl Iterator<Item = String>, limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for item in items {
        let key = item.trim().to_string();
        if key.is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    let mut ranked: Vec<(usize, String, usize)> = counts
        .into_iter()
        .enumerate()
        .map(|(i, (k, n))| (i, k, n))
        .collect();
    ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(_, k, _)| k).collect()
}

/// Exact-string dedup that keeps first-seen order.
fn dedup_in_order(items: impl Iterator<Item = String>, limit: usize) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
        if seen.len() == limit {
            break;
        }
    }
    seen
}

/// Collapse a record set into a task summary. `None` when there is nothing
/// to aggregate.
pub fn summarize(task: &str, model: &str, records: &[EvaluationRecord]) -> Option<TaskSummary> {
    if records.is_empty() {
        return None;
    }

    let mut by_iteration: BTreeMap<u32, Vec<&EvaluationRecord>> = BTreeMap::new();
    for record in records {
        by_iteration.entry(record.iteration).or_default().push(record);
    }

    let mut score_progression = Vec::new();
    let mut criterion_progression: BTreeMap<String, Vec<f64>> = Criterion::ALL
        .iter()
        .map(|c| (c.as_str().to_string(), Vec::new()))
        .collect();
    let mut criterion_variances: BTreeMap<&str, Vec<f64>> = Criterion::ALL
        .iter()
        .map(|c| (c.as_str(), Vec::new()))
        .collect();
    let mut agreements = Vec::new();
    let mut controversial_iterations = Vec::new();
    let mut best_iteration = 0u32;
    let mut best_score = f64::NEG_INFINITY;
    let mut worst_iteration = 0u32;
    let mut worst_score = f64::INFINITY;

    for (&iteration, group) in &by_iteration {
        let overalls: Vec<f64> = group.iter().map(|r| r.overall).collect();
        let avg = mean(&overalls);
        score_progression.push(avg);
        if avg > best_score {
            best_score = avg;
            best_iteration = iteration;
        }
        if avg < worst_score {
            worst_score = avg;
            worst_iteration = iteration;
        }
        for criterion in Criterion::ALL {
            let values: Vec<f64> = group.iter().map(|r| r.scores.get(criterion)).collect();
            if let Some(series) = criterion_progression.get_mut(criterion.as_str()) {
                series.push(mean(&values));
            }
            if values.len() > 1 {
                if let Some(variances) = criterion_variances.get_mut(criterion.as_str()) {
                    variances.push(population_variance(&values));
                }
            }
        }

        if overalls.len() > 1 {
            agreements.push((1.0 - population_variance(&overalls) / 25.0).max(0.0));
            let spread = overalls.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - overalls.iter().cloned().fold(f64::INFINITY, f64::min);
            if spread > CONTROVERSY_THRESHOLD {
                controversial_iterations.push(iteration);
            }
        }
    }

    let final_score = score_progression.last().copied().unwrap_or(0.0);
    let total_improvement = final_score - score_progression.first().copied().unwrap_or(0.0);

    let mut criterion_averages = BTreeMap::new();
    for criterion in Criterion::ALL {
        let values: Vec<f64> = records.iter().map(|r| r.scores.get(criterion)).collect();
        criterion_averages.insert(criterion.as_str().to_string(), mean(&values));
    }

    let mut criteria_improvements = BTreeMap::new();
    for (criterion, series) in &criterion_progression {
        let delta = if series.len() > 1 {
            series.last().copied().unwrap_or(0.0) - series.first().copied().unwrap_or(0.0)
        } else {
            0.0
        };
        criteria_improvements.insert(criterion.clone(), delta);
    }

    let controversial_criteria: Vec<String> = Criterion::ALL
        .iter()
        .filter(|c| {
            criterion_variances
                .get(c.as_str())
                .is_some_and(|v| !v.is_empty() && mean(v) > CONTROVERSY_THRESHOLD)
        })
        .map(|c| c.as_str().to_string())
        .collect();

    let judge_agreement = if agreements.is_empty() {
        1.0
    } else {
        mean(&agreements)
    };

    let last_iteration = by_iteration.keys().last().copied().unwrap_or(0);
    let priority_improvements = dedup_in_order(
        records
            .iter()
            .filter(|r| r.iteration == last_iteration)
            .flat_map(|r| r.suggestions.iter().cloned()),
        MAX_PRIORITY_IMPROVEMENTS,
    );

    Some(TaskSummary {
        task: task.to_string(),
        model: model.to_string(),
        iterations_evaluated: by_iteration.len(),
        score_progression,
        total_improvement,
        final_score,
        best_iteration,
        worst_iteration,
        criterion_averages,
        criterion_progression,
        criteria_improvements,
        judge_agreement,
        controversial_criteria,
        controversial_iterations,
        top_strengths: top_by_frequency(
            records.iter().flat_map(|r| r.strengths.iter().cloned()),
            TOP_THEMES,
        ),
        top_weaknesses: top_by_frequency(
            records.iter().flat_map(|r| r.weaknesses.iter().cloned()),
            TOP_THEMES,
        ),
        priority_improvements,
    })
}

/// Cross-task overview built from every task summary of the run.
pub fn benchmark_summary(summaries: &[TaskSummary]) -> BenchmarkSummary {
    let mut by_model: BTreeMap<&str, Vec<&TaskSummary>> = BTreeMap::new();
    for summary in summaries {
        by_model.entry(&summary.model).or_default().push(summary);
    }

    let mut by_task: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for summary in summaries {
        by_task
            .entry(&summary.task)
            .or_default()
            .push(summary.final_score);
    }
    let mut task_difficulty: Vec<TaskDifficulty> = by_task
        .into_iter()
        .map(|(task, finals)| TaskDifficulty {
            task: task.to_string(),
            average_final_score: mean(&finals),
            models_evaluated: finals.len(),
        })
        .collect();
    task_difficulty.sort_by(|a, b| a.average_final_score.total_cmp(&b.average_final_score));

    let mut models: Vec<ModelOverview> = by_model
        .into_iter()
        .map(|(model, group)| {
            let finals: Vec<f64> = group.iter().map(|s| s.final_score).collect();
            let improvements: Vec<f64> = group.iter().map(|s| s.total_improvement).collect();
            let best_task = group
                .iter()
                .max_by(|a, b| a.final_score.total_cmp(&b.final_score))
                .map(|s| s.task.clone());
            let worst_task = group
                .iter()
                .min_by(|a, b| a.final_score.total_cmp(&b.final_score))
                .map(|s| s.task.clone());
            ModelOverview {
                model: model.to_string(),
                tasks_evaluated: group.len(),
                average_final_score: mean(&finals),
                average_improvement: mean(&improvements),
                best_task,
                worst_task,
            }
        })
        .collect();
    models.sort_by(|a, b| b.average_final_score.total_cmp(&a.average_final_score));

    BenchmarkSummary {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        models,
        task_difficulty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CriterionScores;

    fn record(judge: &str, iteration: u32, overall: f64) -> EvaluationRecord {
        EvaluationRecord {
            judge: judge.to_string(),
            iteration,
            scores: CriterionScores {
                visual_appeal: overall,
                functionality: overall,
                responsiveness: overall,
                code_quality: overall,
                task_completion: overall,
            },
            overall,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn progression_and_improvement() {
        let records = vec![
            record("a", 1, 6.0),
            record("b", 1, 8.0),
            record("a", 2, 9.0),
            record("b", 2, 9.0),
        ];
        let summary = summarize("landing", "llava:13b", &records).unwrap();
        assert_eq!(summary.score_progression, vec![7.0, 9.0]);
        assert_eq!(summary.total_improvement, 2.0);
        assert_eq!(summary.final_score, 9.0);
        assert_eq!(summary.best_iteration, 2);
        assert_eq!(summary.worst_iteration, 1);
        assert_eq!(summary.criterion_progression["visual_appeal"], vec![7.0, 9.0]);
    }

    #[test]
    fn tied_iterations_keep_the_earliest() {
        let records = vec![record("a", 1, 6.0), record("a", 2, 6.0)];
        let summary = summarize("t", "m", &records).unwrap();
        assert_eq!(summary.best_iteration, 1);
        assert_eq!(summary.worst_iteration, 1);
    }

    #[test]
    fn unanimous_judges_agree_fully() {
        let records = vec![record("a", 1, 5.0), record("b", 1, 5.0), record("c", 1, 5.0)];
        let summary = summarize("t", "m", &records).unwrap();
        assert_eq!(summary.judge_agreement, 1.0);
        assert!(summary.controversial_iterations.is_empty());
    }

    #[test]
    fn maximal_split_has_zero_agreement() {
        let records = vec![record("a", 1, 0.0), record("b", 1, 10.0)];
        let summary = summarize("t", "m", &records).unwrap();
        assert_eq!(summary.judge_agreement, 0.0);
        assert_eq!(summary.controversial_iterations, vec![1]);
        // Every criterion split 0-vs-10 as well.
        assert_eq!(summary.controversial_criteria.len(), 5);
    }

    #[test]
    fn single_judge_defaults_to_full_agreement() {
        let records = vec![record("a", 1, 4.0), record("a", 2, 6.0)];
        let summary = summarize("t", "m", &records).unwrap();
        assert_eq!(summary.judge_agreement, 1.0);
    }

    #[test]
    fn no_records_no_summary() {
        assert!(summarize("t", "m", &[]).is_none());
    }

    #[test]
    fn themes_ranked_by_frequency_with_stable_ties() {
        let mut a = record("a", 1, 5.0);
        a.weaknesses = vec!["contrast".into(), "spacing".into()];
        let mut b = record("b", 1, 5.0);
        b.weaknesses = vec!["spacing".into(), "alignment".into(), "Contrast".into()];
        let summary = summarize("t", "m", &[a, b]).unwrap();
        // Counting is exact-string, so "Contrast" is its own theme.
        assert_eq!(
            summary.top_weaknesses,
            vec!["spacing", "contrast", "alignment", "Contrast"]
        );
    }

    #[test]
    fn priority_improvements_keep_last_iteration_order() {
        let mut early = record("a", 1, 5.0);
        early.suggestions = vec!["stale advice".into()];
        let mut late_a = record("a", 2, 6.0);
        late_a.suggestions = vec!["z first".into(), "a second".into()];
        let mut late_b = record("b", 2, 6.0);
        late_b.suggestions = vec!["a second".into()];

        let summary = summarize("t", "m", &[early, late_a, late_b]).unwrap();
        // First-seen order survives, repeats collapse, earlier rounds drop out.
        assert_eq!(summary.priority_improvements, vec!["z first", "a second"]);
    }

    #[test]
    fn priority_improvements_capped_at_ten() {
        let mut r = record("a", 1, 5.0);
        r.suggestions = (0..15).map(|i| format!("suggestion {i}")).collect();
        let summary = summarize("t", "m", &[r]).unwrap();
        assert_eq!(summary.priority_improvements.len(), 10);
        assert_eq!(summary.priority_improvements[0], "suggestion 0");
    }

    #[test]
    fn controversial_criterion_surfaces_despite_agreeing_overalls() {
        let mut a = record("a", 1, 5.0);
        a.scores.visual_appeal = 0.0;
        let mut b = record("b", 1, 5.0);
        b.scores.visual_appeal = 10.0;

        let summary = summarize("t", "m", &[a, b]).unwrap();
        // Overall scores match, so the iteration itself is uncontroversial.
        assert!(summary.controversial_iterations.is_empty());
        assert_eq!(summary.judge_agreement, 1.0);
        // The criterion-level split (variance 25) still gets flagged.
        assert_eq!(summary.controversial_criteria, vec!["visual_appeal"]);
    }

    #[test]
    fn single_judge_runs_have_no_controversial_criteria() {
        let records = vec![record("a", 1, 3.0), record("a", 2, 9.0)];
        let summary = summarize("t", "m", &records).unwrap();
        assert!(summary.controversial_criteria.is_empty());
    }

    #[test]
    fn criteria_improvements_track_last_minus_first() {
        let mut first = record("a", 1, 4.0);
        first.scores.code_quality = 2.0;
        let mut last = record("a", 3, 8.0);
        last.scores.code_quality = 9.0;

        let summary = summarize("t", "m", &[first, last]).unwrap();
        assert_eq!(summary.criteria_improvements["code_quality"], 7.0);
        assert_eq!(summary.criteria_improvements["functionality"], 4.0);

        let single = summarize("t", "m", &[record("a", 1, 6.0)]).unwrap();
        assert!(single.criteria_improvements.values().all(|&d| d == 0.0));
    }

    #[test]
    fn overview_groups_by_model() {
        let s1 = summarize("t1", "m1", &[record("a", 1, 4.0), record("a", 2, 8.0)]).unwrap();
        let s2 = summarize("t2", "m1", &[record("a", 1, 6.0)]).unwrap();
        let overview = benchmark_summary(&[s1, s2]);
        assert_eq!(overview.models.len(), 1);
        let row = &overview.models[0];
        assert_eq!(row.tasks_evaluated, 2);
        assert_eq!(row.average_final_score, 7.0);
        assert_eq!(row.best_task.as_deref(), Some("t1"));
    }

    #[test]
    fn overview_ranks_models_and_tasks() {
        let s1 = summarize("t1", "weak", &[record("a", 1, 3.0)]).unwrap();
        let s2 = summarize("t1", "strong", &[record("a", 1, 9.0)]).unwrap();
        let s3 = summarize("t2", "strong", &[record("a", 1, 5.0)]).unwrap();
        let overview = benchmark_summary(&[s1, s2, s3]);

        assert_eq!(overview.models[0].model, "strong");
        assert_eq!(overview.models[1].model, "weak");
        // t1 averages 6.0 across models, t2 only 5.0: t2 ranks harder.
        assert_eq!(overview.task_difficulty[0].task, "t2");
        assert_eq!(overview.task_difficulty[1].models_evaluated, 2);
    }
}
