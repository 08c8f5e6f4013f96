use crate::models::QuestionGrade;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradeSummary {
    pub(crate) final_score: f64,
    pub(crate) correct_count: usize,
}

/// Mean score rounded to two decimals, plus the number of fully correct answers.
/// No grades means a score of 0.0.
pub(crate) fn aggregate(grades: &[QuestionGrade]) -> GradeSummary {
    let correct_count = grades.iter().filter(|grade| grade.is_correct).count();
    if grades.is_empty() {
        return GradeSummary { final_score: 0.0, correct_count };
    }

    let total: f64 = grades.iter().map(|grade| grade.score).sum();
    let mean = total / grades.len() as f64;

    GradeSummary { final_score: round_to_cents(mean), correct_count }
}

/// Rounds half away from zero on the scaled value (`f64::round`), not half to even.
fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::grade;

    #[test]
    fn empty_grades_score_zero() {
        assert_eq!(aggregate(&[]), GradeSummary { final_score: 0.0, correct_count: 0 });
    }

    #[test]
    fn mean_is_rounded_to_two_decimals() {
        let grades = [grade(0, 100.0), grade(1, 100.0), grade(2, 50.0)];

        let summary = aggregate(&grades);

        assert_eq!(summary.final_score, 83.33);
        assert_eq!(summary.correct_count, 2);
    }

    #[test]
    fn partial_scores_are_averaged() {
        let grades = [grade(0, 85.5), grade(1, 40.0)];

        let summary = aggregate(&grades);

        assert_eq!(summary.final_score, 62.75);
        assert_eq!(summary.correct_count, 0);
    }

    #[test]
    fn rounding_goes_half_away_from_zero() {
        let grades = [grade(0, 66.665), grade(1, 66.665)];

        assert_eq!(aggregate(&grades).final_score, 66.67);
    }

    #[test]
    fn exact_tie_rounds_up_not_to_even() {
        assert_eq!(aggregate(&[grade(0, 0.125)]).final_score, 0.13);
    }
}
