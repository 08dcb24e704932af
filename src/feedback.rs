//! Satisfaction and recommendation scores from staff and customers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Feedback, UserRole};
use crate::store::{self, Record};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeedback {
    /// Defaults to `customer`.
    #[serde(default)]
    pub role: Option<UserRole>,
    pub satisfaction: u8,
    pub recommendation: u8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAverages {
    pub count: usize,
    pub satisfaction: f64,
    pub recommendation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleFeedback {
    pub role: UserRole,
    pub averages: FeedbackAverages,
}

fn score_in_range(label: &str, score: u8) -> PosResult<()> {
    if !(1..=10).contains(&score) {
        warn!(field = label, score, "feedback score out of range");
        return Err(PosError::validation(format!(
            "{label} must be between 1 and 10"
        )));
    }
    Ok(())
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn submit_feedback(db: &DbState, input: NewFeedback) -> PosResult<Feedback> {
    score_in_range("Satisfaction", input.satisfaction)?;
    score_in_range("Recommendation", input.recommendation)?;
    if input.comment.trim().is_empty() {
        return Err(PosError::validation("Comment is required"));
    }
    let conn = db.conn.lock()?;
    let feedback = store::insert(
        &conn,
        Feedback {
            id: store::new_id(Feedback::ID_PREFIX),
            role: input.role.unwrap_or(UserRole::Customer),
            satisfaction: input.satisfaction,
            recommendation: input.recommendation,
            comment: input.comment.trim().to_string(),
            created_at: Utc::now(),
        },
    )?;
    info!(id = %feedback.id, role = %feedback.role, "feedback submitted");
    Ok(feedback)
}

pub fn list_feedback(db: &DbState) -> PosResult<Vec<Feedback>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn feedback_by_role(db: &DbState, role: UserRole) -> PosResult<Vec<Feedback>> {
    Ok(list_feedback(db)?
        .into_iter()
        .filter(|f| f.role == role)
        .collect())
}

/// Averages rounded to one decimal; zeros when there is no feedback.
pub fn averages(entries: &[Feedback]) -> FeedbackAverages {
    if entries.is_empty() {
        return FeedbackAverages {
            count: 0,
            satisfaction: 0.0,
            recommendation: 0.0,
        };
    }
    let n = entries.len() as f64;
    let sat: f64 = entries.iter().map(|f| f64::from(f.satisfaction)).sum();
    let rec: f64 = entries.iter().map(|f| f64::from(f.recommendation)).sum();
    FeedbackAverages {
        count: entries.len(),
        satisfaction: round_one_decimal(sat / n),
        recommendation: round_one_decimal(rec / n),
    }
}

pub fn overall_averages(db: &DbState) -> PosResult<FeedbackAverages> {
    Ok(averages(&list_feedback(db)?))
}

/// Averages per role, for roles that have at least one entry.
pub fn summary_by_role(db: &DbState) -> PosResult<Vec<RoleFeedback>> {
    let all = list_feedback(db)?;
    Ok(UserRole::ALL
        .iter()
        .filter_map(|role| {
            let mine: Vec<Feedback> = all.iter().filter(|f| f.role == *role).cloned().collect();
            (!mine.is_empty()).then(|| RoleFeedback {
                role: *role,
                averages: averages(&mine),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn entry(role: Option<UserRole>, sat: u8, rec: u8) -> NewFeedback {
        NewFeedback {
            role,
            satisfaction: sat,
            recommendation: rec,
            comment: "Todo muy rico".into(),
        }
    }

    #[test]
    fn test_scores_must_be_in_range() {
        let db = test_db_state();
        assert!(submit_feedback(&db, entry(None, 0, 5)).is_err());
        assert!(submit_feedback(&db, entry(None, 5, 11)).is_err());
        let mut blank = entry(None, 5, 5);
        blank.comment = "   ".into();
        assert!(submit_feedback(&db, blank).is_err());
        assert!(list_feedback(&db).unwrap().is_empty());
    }

    #[test]
    fn test_role_defaults_to_customer() {
        let db = test_db_state();
        let f = submit_feedback(&db, entry(None, 8, 9)).unwrap();
        assert_eq!(f.role, UserRole::Customer);
    }

    #[test]
    fn test_averages_round_to_one_decimal() {
        let db = test_db_state();
        submit_feedback(&db, entry(None, 8, 9)).unwrap();
        submit_feedback(&db, entry(None, 9, 10)).unwrap();
        submit_feedback(&db, entry(None, 9, 10)).unwrap();
        submit_feedback(&db, entry(Some(UserRole::Waiter), 6, 7)).unwrap();

        let overall = overall_averages(&db).unwrap();
        assert_eq!(overall.count, 4);
        assert_eq!(overall.satisfaction, 8.0);
        assert_eq!(overall.recommendation, 9.0);

        let summary = summary_by_role(&db).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].role, UserRole::Waiter);
        assert_eq!(summary[1].role, UserRole::Customer);
        assert_eq!(summary[1].averages.satisfaction, 8.7);
        assert_eq!(summary[1].averages.recommendation, 9.7);

        assert_eq!(feedback_by_role(&db, UserRole::Waiter).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_averages() {
        let db = test_db_state();
        let a = overall_averages(&db).unwrap();
        assert_eq!(a.count, 0);
        assert_eq!(a.satisfaction, 0.0);
    }
}
