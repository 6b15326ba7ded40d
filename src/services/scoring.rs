/// Points every correct answer earns.
pub const BASE_POINTS: u64 = 50;
/// Upper bound of the speed bonus, earned by answering with the full timer left.
pub const MAX_TIME_BONUS: u64 = 50;

/// Points for a correct answer given the timer the player observed when answering.
///
/// `base + round(MAX_TIME_BONUS * timer / time_per_question)`, rounding halves up. The timer
/// is clamped to `0..=time_per_question` first, so a stale or out-of-range replica value can
/// never push the bonus outside its bounds.
pub fn points_for_correct(timer: u32, time_per_question: u32) -> u64 {
    if time_per_question == 0 {
        return BASE_POINTS;
    }

    let timer = u64::from(timer.min(time_per_question));
    let total = u64::from(time_per_question);
    BASE_POINTS + (2 * MAX_TIME_BONUS * timer + total) / (2 * total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_classroom_example() {
        assert_eq!(points_for_correct(15, 20), 88);
    }

    #[test]
    fn rounds_halves_up() {
        assert_eq!(points_for_correct(1, 4), 63);
        assert_eq!(points_for_correct(10, 20), 75);
        assert_eq!(points_for_correct(1, 3), 67);
    }

    #[test]
    fn bonus_stays_within_bounds() {
        assert_eq!(points_for_correct(0, 20), BASE_POINTS);
        assert_eq!(points_for_correct(20, 20), BASE_POINTS + MAX_TIME_BONUS);
        assert_eq!(points_for_correct(45, 20), BASE_POINTS + MAX_TIME_BONUS);
        assert_eq!(points_for_correct(5, 0), BASE_POINTS);

        for tpq in 1..=60 {
            for timer in 0..=tpq + 5 {
                let points = points_for_correct(timer, tpq);
                assert!((BASE_POINTS..=BASE_POINTS + MAX_TIME_BONUS).contains(&points));
            }
        }
    }
}
