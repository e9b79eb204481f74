//! Turns a raw prediction into the clinical summary stored with a scan.

use std::ops::RangeInclusive;

use rand::Rng;

use super::classifier::Prediction;
use crate::models::enums::{CardioRisk, DrGrade, EstimateBasis};

/// Range of the placeholder biological-age estimate, in years.
pub const BIOLOGICAL_AGE_RANGE: RangeInclusive<u8> = 30..=75;

/// Decimal places kept on confidence values returned to callers.
pub const CONFIDENCE_DECIMALS: i32 = 4;

/// Grades above this index raise the cardiovascular bucket to `Moderate`.
const CARDIO_GRADE_THRESHOLD: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub grade: DrGrade,
    /// Rounded to [`CONFIDENCE_DECIMALS`], always in [0, 1].
    pub confidence: f64,
    /// Uniformly sampled, not derived from the image. See `biological_age_basis`.
    pub biological_age: u8,
    pub biological_age_basis: EstimateBasis,
    pub cardiovascular_risk: CardioRisk,
    pub diseases_found: Vec<String>,
}

impl Diagnosis {
    pub fn label(&self) -> &'static str {
        self.grade.label()
    }

    pub fn is_normal(&self) -> bool {
        self.grade.is_normal()
    }
}

/// Rule-based bucket, fixed by grade alone.
pub fn cardio_risk(grade: DrGrade) -> CardioRisk {
    if grade.index() > CARDIO_GRADE_THRESHOLD {
        CardioRisk::Moderate
    } else {
        CardioRisk::Low
    }
}

/// Empty for a normal retina, otherwise the single grade label.
pub fn diseases_found(grade: DrGrade) -> Vec<String> {
    if grade.is_normal() {
        Vec::new()
    } else {
        vec![grade.label().to_string()]
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn sample_biological_age<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.gen_range(BIOLOGICAL_AGE_RANGE)
}

pub fn aggregate<R: Rng + ?Sized>(prediction: &Prediction, rng: &mut R) -> Diagnosis {
    let grade = prediction.grade;
    let confidence = round_to(
        f64::from(prediction.confidence).clamp(0.0, 1.0),
        CONFIDENCE_DECIMALS,
    );

    Diagnosis {
        grade,
        confidence,
        biological_age: sample_biological_age(rng),
        biological_age_basis: EstimateBasis::Heuristic,
        cardiovascular_risk: cardio_risk(grade),
        diseases_found: diseases_found(grade),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn prediction(grade: DrGrade, confidence: f32) -> Prediction {
        Prediction {
            grade,
            confidence,
            probabilities: vec![0.2; 5],
        }
    }

    #[test]
    fn cardio_risk_is_moderate_only_above_grade_two() {
        let risks: Vec<CardioRisk> = DrGrade::ALL.iter().map(|g| cardio_risk(*g)).collect();
        assert_eq!(
            risks,
            vec![
                CardioRisk::Low,
                CardioRisk::Low,
                CardioRisk::Low,
                CardioRisk::Moderate,
                CardioRisk::Moderate
            ]
        );
    }

    #[test]
    fn diseases_found_empty_iff_normal() {
        for grade in DrGrade::ALL {
            let found = diseases_found(grade);
            if grade == DrGrade::NoDr {
                assert!(found.is_empty());
            } else {
                assert_eq!(found, vec![grade.label().to_string()]);
            }
        }
    }

    #[test]
    fn biological_age_stays_in_range_and_is_tagged_heuristic() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let d = aggregate(&prediction(DrGrade::Mild, 0.5), &mut rng);
            assert!(BIOLOGICAL_AGE_RANGE.contains(&d.biological_age));
            assert_eq!(d.biological_age_basis, EstimateBasis::Heuristic);
        }
    }

    #[test]
    fn confidence_is_rounded_and_clamped() {
        let mut rng = StdRng::seed_from_u64(2);
        let d = aggregate(&prediction(DrGrade::Severe, 0.876_543_2), &mut rng);
        assert_eq!(d.confidence, 0.8765);
        assert_eq!(d.label(), "Severe");
        assert!(!d.is_normal());

        let d = aggregate(&prediction(DrGrade::NoDr, 1.000_001), &mut rng);
        assert_eq!(d.confidence, 1.0);
        assert!(d.is_normal());
    }
}
