//! Priority engine.
//!
//! [`effective_priority`] is a pure function over committed state: it reads
//! user overrides, deadlines, the current `is_active` flag of sprints and
//! account weights, and never writes anything. Scores are recomputed on read.
//!
//! Score composition, in order:
//!
//! 1. user override: `+100` if pinned, plus the explicit priority bonus
//! 2. temporal urgency from the nearest deadline
//! 3. every sprint active on the item's project multiplies the running
//!    total, applied in sprint creation order; the total is first raised to
//!    at least `SPRINT_MIN_BASE`
//! 4. the originating account's weight multiplies the running total
//! 5. the pipeline's own inferred score is added last, unweighted

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::{DEFAULT_ACCOUNT_WEIGHT, PINNED_BONUS, SPRINT_MIN_BASE};
use crate::models::{
    text_enum, FactStatus, Project, ProjectStatus, Sprint, StructuredFact, UserPriority,
};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityItemKind {
    Project,
    Task,
    Commitment,
}

/// Inputs the engine needs for one project or fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityItem {
    pub id: Uuid,
    pub kind: PriorityItemKind,
    pub title: String,
    /// Project whose sprints apply. A project item points at itself.
    pub project_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub pinned: bool,
    pub user_priority: Option<UserPriority>,
    pub user_deadline: Option<NaiveDate>,
    pub inferred_due: Option<NaiveDate>,
    /// Baseline estimate from the extraction pipeline.
    pub inferred_score: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl PriorityItem {
    /// Nearest of the user-set deadline and the inferred due date.
    pub fn nearest_deadline(&self) -> Option<NaiveDate> {
        match (self.user_deadline, self.inferred_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Build an item for a project. `inferred_due` is the nearest due date
    /// among the project's open facts.
    pub fn from_project(project: &Project, inferred_due: Option<NaiveDate>) -> Self {
        Self {
            id: project.id,
            kind: PriorityItemKind::Project,
            title: project.name.clone(),
            project_id: Some(project.id),
            account_id: None,
            pinned: project.pinned,
            user_priority: project.user_priority,
            user_deadline: project.user_deadline,
            inferred_due,
            inferred_score: activity_score(
                project.mention_count,
                project.source_diversity,
                project.person_ids.len(),
            ),
            last_activity: project.last_activity,
        }
    }

    pub fn from_fact(fact: &StructuredFact) -> Self {
        Self {
            id: fact.id,
            kind: match fact.kind {
                crate::models::FactKind::Task => PriorityItemKind::Task,
                crate::models::FactKind::Commitment => PriorityItemKind::Commitment,
            },
            title: fact.description.clone(),
            project_id: fact.project_id,
            account_id: fact.account_id,
            pinned: fact.pinned,
            user_priority: fact.user_priority,
            user_deadline: fact.user_deadline,
            inferred_due: fact.inferred_due,
            inferred_score: fact.inferred_priority.baseline(),
            last_activity: Some(fact.updated_at),
        }
    }
}

/// Activity signal used as a project's inferred score.
pub fn activity_score(mention_count: i32, source_diversity: i32, people_count: usize) -> f64 {
    (f64::from(mention_count.max(0)) + 1.0).ln() * 2.0
        + f64::from(source_diversity.max(0)) * 3.0
        + people_count as f64 * 1.5
}

/// Sprints and account weights shared by every item in one ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityContext {
    pub sprints: Vec<Sprint>,
    pub account_weights: HashMap<Uuid, f64>,
}

impl PriorityContext {
    pub fn new(sprints: Vec<Sprint>, account_weights: HashMap<Uuid, f64>) -> Self {
        Self {
            sprints,
            account_weights,
        }
    }

    /// Sprints boosting `project_id` at `now`, in creation order.
    pub fn sprints_for(&self, project_id: Uuid, now: DateTime<Utc>) -> Vec<&Sprint> {
        let mut active: Vec<&Sprint> = self
            .sprints
            .iter()
            .filter(|s| s.project_id == project_id && s.applies_at(now))
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        active
    }

    pub fn account_weight(&self, account_id: Option<Uuid>) -> f64 {
        account_id
            .and_then(|id| self.account_weights.get(&id).copied())
            .unwrap_or(DEFAULT_ACCOUNT_WEIGHT)
    }
}

/// Score contribution of the nearest deadline.
pub fn temporal_urgency(deadline: Option<NaiveDate>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let days_left = (deadline - now.date_naive()).num_days();
    match days_left {
        d if d <= 0 => 90.0,
        d if d <= 3 => 70.0,
        d if d <= 7 => 40.0,
        d if d <= 14 => 20.0,
        _ => 5.0,
    }
}

/// Deterministic effective priority of one item at `now`.
pub fn effective_priority(item: &PriorityItem, ctx: &PriorityContext, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;

    if item.pinned {
        score += PINNED_BONUS;
    }
    if let Some(priority) = item.user_priority {
        score += priority.bonus();
    }

    score += temporal_urgency(item.nearest_deadline(), now);

    if let Some(project_id) = item.project_id {
        let sprints = ctx.sprints_for(project_id, now);
        if !sprints.is_empty() {
            score = score.max(SPRINT_MIN_BASE);
        }
        for sprint in sprints {
            score *= sprint.boost.max(0.0);
        }
    }

    score *= ctx.account_weight(item.account_id).max(0.0);

    score + item.inferred_score
}

/// Which items a ranking includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingScope {
    #[default]
    All,
    /// Pinned items and items due today or overdue.
    Today,
    /// Pinned items and items due within a week.
    Week,
}

text_enum!(RankingScope {
    All => "all",
    Today => "today",
    Week => "week",
});

impl RankingScope {
    pub fn includes(&self, item: &PriorityItem, now: DateTime<Utc>) -> bool {
        let horizon = match self {
            RankingScope::All => return true,
            RankingScope::Today => 0,
            RankingScope::Week => 7,
        };
        item.pinned
            || item
                .nearest_deadline()
                .is_some_and(|d| (d - now.date_naive()).num_days() <= horizon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: PriorityItem,
    pub score: f64,
}

/// Sort by score descending, then nearest deadline, then most recent
/// activity. Items without a deadline or activity sort after those with one.
pub fn rank(
    items: Vec<PriorityItem>,
    ctx: &PriorityContext,
    now: DateTime<Utc>,
    scope: RankingScope,
) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = items
        .into_iter()
        .filter(|item| scope.includes(item, now))
        .map(|item| RankedItem {
            score: effective_priority(&item, ctx, now),
            item,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| cmp_some_first(a.item.nearest_deadline(), b.item.nearest_deadline()))
            .then_with(|| cmp_some_first(b.item.last_activity, a.item.last_activity))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    ranked
}

fn cmp_some_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Everything needed to rank, loaded eagerly from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrioritySnapshot {
    pub projects: Vec<PriorityItem>,
    pub facts: Vec<PriorityItem>,
    pub context: PriorityContext,
}

impl PrioritySnapshot {
    /// Assemble a snapshot from loaded rows. Only active projects and open
    /// facts are ranked.
    pub fn assemble(
        projects: &[Project],
        facts: &[StructuredFact],
        sprints: Vec<Sprint>,
        account_weights: HashMap<Uuid, f64>,
    ) -> Self {
        let open: Vec<&StructuredFact> = facts
            .iter()
            .filter(|f| f.effective_status() == FactStatus::Open)
            .collect();

        let project_items = projects
            .iter()
            .filter(|p| {
                p.status == ProjectStatus::Active
                    && p.entity_status == crate::models::EntityStatus::Active
            })
            .map(|p| {
                let due = open
                    .iter()
                    .filter(|f| f.project_id == Some(p.id))
                    .filter_map(|f| f.user_deadline.or(f.inferred_due))
                    .min();
                PriorityItem::from_project(p, due)
            })
            .collect();

        Self {
            projects: project_items,
            facts: open.into_iter().map(PriorityItem::from_fact).collect(),
            context: PriorityContext::new(sprints, account_weights),
        }
    }

    pub fn rank_projects(&self, now: DateTime<Utc>, scope: RankingScope) -> Vec<RankedItem> {
        rank(self.projects.clone(), &self.context, now, scope)
    }

    pub fn rank_facts(&self, now: DateTime<Utc>, scope: RankingScope) -> Vec<RankedItem> {
        rank(self.facts.clone(), &self.context, now, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()
    }

    fn item() -> PriorityItem {
        PriorityItem {
            id: Uuid::new_v4(),
            kind: PriorityItemKind::Task,
            title: "write report".into(),
            project_id: None,
            account_id: None,
            pinned: false,
            user_priority: None,
            user_deadline: None,
            inferred_due: None,
            inferred_score: 0.0,
            last_activity: None,
        }
    }

    fn due_in(days: i64) -> Option<NaiveDate> {
        Some(now().date_naive() + Duration::days(days))
    }

    fn sprint(project_id: Uuid, boost: f64, created_offset_secs: i64) -> Sprint {
        Sprint {
            id: Uuid::new_v4(),
            project_id,
            name: "push".into(),
            boost,
            starts_at: now() - Duration::days(1),
            ends_at: now() + Duration::days(1),
            auto_archive: false,
            is_active: true,
            created_at: now() - Duration::days(10) + Duration::seconds(created_offset_secs),
        }
    }

    #[test]
    fn test_temporal_buckets() {
        assert_eq!(temporal_urgency(due_in(-2), now()), 90.0);
        assert_eq!(temporal_urgency(due_in(0), now()), 90.0);
        assert_eq!(temporal_urgency(due_in(3), now()), 70.0);
        assert_eq!(temporal_urgency(due_in(7), now()), 40.0);
        assert_eq!(temporal_urgency(due_in(14), now()), 20.0);
        assert_eq!(temporal_urgency(due_in(30), now()), 5.0);
        assert_eq!(temporal_urgency(None, now()), 0.0);
    }

    #[test]
    fn test_fewer_days_left_strictly_increases_temporal_term() {
        assert!(temporal_urgency(due_in(2), now()) > temporal_urgency(due_in(10), now()));
    }

    #[test]
    fn test_pinned_never_scores_below_unpinned() {
        let ctx = PriorityContext::default();
        let variants = [
            (None, None),
            (Some(UserPriority::Low), due_in(1)),
            (Some(UserPriority::Critical), due_in(40)),
            (Some(UserPriority::High), None),
        ];
        for (priority, deadline) in variants {
            let mut plain = item();
            plain.user_priority = priority;
            plain.user_deadline = deadline;
            let mut pinned = plain.clone();
            pinned.pinned = true;
            assert!(
                effective_priority(&pinned, &ctx, now()) >= effective_priority(&plain, &ctx, now())
            );
        }
    }

    #[test]
    fn test_user_override_terms() {
        let ctx = PriorityContext::default();
        let mut it = item();
        it.pinned = true;
        it.user_priority = Some(UserPriority::Critical);
        assert_eq!(effective_priority(&it, &ctx, now()), 180.0);
    }

    #[test]
    fn test_nearest_deadline_wins() {
        let mut it = item();
        it.user_deadline = due_in(20);
        it.inferred_due = due_in(2);
        assert_eq!(it.nearest_deadline(), due_in(2));
        assert_eq!(
            effective_priority(&it, &PriorityContext::default(), now()),
            70.0
        );
    }

    #[test]
    fn test_sprint_multiplies_running_total() {
        let project_id = Uuid::new_v4();
        let mut it = item();
        it.project_id = Some(project_id);
        it.user_priority = Some(UserPriority::High);
        let ctx = PriorityContext::new(vec![sprint(project_id, 2.0, 0)], HashMap::new());
        assert_eq!(effective_priority(&it, &ctx, now()), 80.0);
    }

    #[test]
    fn test_overlapping_sprints_compose_multiplicatively() {
        let project_id = Uuid::new_v4();
        let mut it = item();
        it.project_id = Some(project_id);
        it.user_priority = Some(UserPriority::High);
        let ctx = PriorityContext::new(
            vec![sprint(project_id, 1.5, 10), sprint(project_id, 2.0, 0)],
            HashMap::new(),
        );
        assert_eq!(effective_priority(&it, &ctx, now()), 120.0);
        let order: Vec<f64> = ctx.sprints_for(project_id, now()).iter().map(|s| s.boost).collect();
        assert_eq!(order, vec![2.0, 1.5]);
    }

    #[test]
    fn test_sprint_lifts_zero_base_item() {
        let project_id = Uuid::new_v4();
        let mut it = item();
        it.project_id = Some(project_id);
        it.inferred_score = 15.0;
        let ctx = PriorityContext::new(vec![sprint(project_id, 3.0, 0)], HashMap::new());
        assert_eq!(
            effective_priority(&it, &ctx, now()),
            SPRINT_MIN_BASE * 3.0 + 15.0
        );

        // Without the sprint only the baseline remains.
        assert_eq!(
            effective_priority(&it, &PriorityContext::default(), now()),
            15.0
        );
    }

    #[test]
    fn test_sprint_floor_applies_once_before_overlaps() {
        let project_id = Uuid::new_v4();
        let mut it = item();
        it.project_id = Some(project_id);
        it.user_priority = Some(UserPriority::Low);
        let ctx = PriorityContext::new(
            vec![sprint(project_id, 2.0, 0), sprint(project_id, 1.5, 10)],
            HashMap::new(),
        );
        assert_eq!(effective_priority(&it, &ctx, now()), 30.0);
    }

    #[test]
    fn test_inactive_or_other_project_sprint_ignored() {
        let project_id = Uuid::new_v4();
        let mut it = item();
        it.project_id = Some(project_id);
        it.user_priority = Some(UserPriority::High);
        let mut inactive = sprint(project_id, 5.0, 0);
        inactive.is_active = false;
        let other = sprint(Uuid::new_v4(), 5.0, 0);
        let ctx = PriorityContext::new(vec![inactive, other], HashMap::new());
        assert_eq!(effective_priority(&it, &ctx, now()), 40.0);
    }

    #[test]
    fn test_account_weight_then_baseline() {
        let account = Uuid::new_v4();
        let mut it = item();
        it.account_id = Some(account);
        it.user_priority = Some(UserPriority::High);
        it.inferred_score = 30.0;
        let ctx = PriorityContext::new(Vec::new(), HashMap::from([(account, 0.5)]));
        assert_eq!(effective_priority(&it, &ctx, now()), 50.0);
    }

    #[test]
    fn test_unknown_account_uses_default_weight() {
        let ctx = PriorityContext::default();
        assert_eq!(ctx.account_weight(Some(Uuid::new_v4())), 1.0);
        assert_eq!(ctx.account_weight(None), 1.0);
    }

    #[test]
    fn test_effective_priority_is_deterministic() {
        let mut it = item();
        it.user_deadline = due_in(5);
        let ctx = PriorityContext::default();
        let first = effective_priority(&it, &ctx, now());
        for _ in 0..10 {
            assert_eq!(effective_priority(&it, &ctx, now()), first);
        }
    }

    #[test]
    fn test_rank_ties_break_by_deadline_then_activity() {
        let ctx = PriorityContext::default();
        let mut later = item();
        later.user_priority = Some(UserPriority::High);
        later.inferred_due = due_in(40);
        let mut sooner = item();
        sooner.user_priority = Some(UserPriority::High);
        sooner.inferred_due = due_in(30);
        let mut stale = item();
        stale.user_priority = Some(UserPriority::Critical);
        stale.last_activity = Some(now() - Duration::days(5));
        let mut fresh = item();
        fresh.user_priority = Some(UserPriority::Critical);
        fresh.last_activity = Some(now());

        let ranked = rank(
            vec![later.clone(), stale.clone(), sooner.clone(), fresh.clone()],
            &ctx,
            now(),
            RankingScope::All,
        );
        let ids: Vec<Uuid> = ranked.iter().map(|r| r.item.id).collect();
        assert_eq!(ids, vec![fresh.id, stale.id, sooner.id, later.id]);
    }

    #[test]
    fn test_rank_scopes() {
        let ctx = PriorityContext::default();
        let mut today = item();
        today.inferred_due = due_in(0);
        let mut week = item();
        week.inferred_due = due_in(5);
        let mut pinned = item();
        pinned.pinned = true;
        let none = item();

        let items = vec![today.clone(), week.clone(), pinned.clone(), none];
        assert_eq!(rank(items.clone(), &ctx, now(), RankingScope::All).len(), 4);
        assert_eq!(rank(items.clone(), &ctx, now(), RankingScope::Week).len(), 3);
        let today_ids: Vec<Uuid> = rank(items, &ctx, now(), RankingScope::Today)
            .into_iter()
            .map(|r| r.item.id)
            .collect();
        assert_eq!(today_ids.len(), 2);
        assert!(today_ids.contains(&today.id) && today_ids.contains(&pinned.id));
    }

    #[test]
    fn test_activity_score() {
        assert_eq!(activity_score(0, 0, 0), 0.0);
        let s = activity_score(3, 2, 2);
        assert!((s - (4f64.ln() * 2.0 + 6.0 + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ranking_scope_parse() {
        assert_eq!("week".parse::<RankingScope>().unwrap(), RankingScope::Week);
        assert!("month".parse::<RankingScope>().is_err());
    }
}
