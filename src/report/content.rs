//! Fixed report text: branding, educational sections, footer.

pub const BRAND_TITLE: &str = "RetiNet Pro";
pub const BRAND_SUBTITLE: &str = "Clinical Diagnostic Report";
pub const FIGURE_CAPTION: &str = "Figure 1: Analyzed Retinal Fundus Scan";

pub const DISCLAIMER_LINES: [&str; 2] = [
    "Generated by RetiNet Pro AI System. Informational purpose only.",
    "This report does not constitute medical advice.",
];

pub const SIGNATURE_LINES: [&str; 2] = [
    "Reviewing Physician: Karthi's AI Doctor",
    "Verified Digital Signature",
];

#[derive(Debug, Clone, Copy)]
pub struct SectionItem<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    pub title: &'a str,
    pub items: &'a [SectionItem<'a>],
}

const fn item(title: &'static str, body: &'static str) -> SectionItem<'static> {
    SectionItem { title, body }
}

pub const UNDERSTANDING_RESULTS: Section<'static> = Section {
    title: "Understanding Your Results",
    items: &[
        item(
            "Diabetic Retinopathy (DR):",
            "The AI scans for \"red lesions\" like micro-bleeds or leaky vessels. It compares these patterns against a massive database to see if they match known signs of disease.",
        ),
        item(
            "Cardiovascular Risk:",
            "It measures the Arteriolar-Venular Ratio (AVR), the thickness of your arteries compared to your veins. If arteries are too narrow, it signals high blood pressure risk.",
        ),
        item(
            "Biological Age:",
            "It calculates a \"Retinal Age Gap\". If your eye vessels look older than your actual age, it suggests your body is aging faster than the calendar says. In this version the estimate is a heuristic placeholder, not a measurement.",
        ),
    ],
};

pub const CLINICAL_IMPLICATIONS: Section<'static> = Section {
    title: "Clinical Implications & Risk Assessment",
    items: &[
        item(
            "If High DR Risk:",
            "Indicates potential microvascular damage. Probability of proliferative retinopathy is high. Strong recommendation for immediate ophthalmological grading.",
        ),
        item(
            "If Elevated Cardio Risk:",
            "Arteriolar narrowing is a robust biomarker for systemic hypertension. Clinical correlation with blood pressure monitoring is prescribed.",
        ),
        item(
            "If Large Age Gap:",
            "Retinal vascular age exceeding chronological age correlates with oxidative stress. Suggests need for comprehensive metabolic screening.",
        ),
    ],
};

pub const DIETARY_RECOMMENDATIONS: Section<'static> = Section {
    title: "Recommended Lifestyle & Dietary Interventions",
    items: &[
        item(
            "Retinal Defense:",
            "Increase intake of leafy greens (Spinach, Kale) rich in Lutein and Zeaxanthin to support macular pigment density.",
        ),
        item(
            "Vascular Integrity:",
            "Omega-3 rich foods (Salmon, Walnuts) to reduce endothelial inflammation and support vessel flexibility.",
        ),
        item(
            "Antioxidant Support:",
            "Berries (Blueberries, Goji) and Citrus fruits for Vitamin C to strengthen micro-vessels.",
        ),
    ],
};

/// Sections printed after the diagnosis, in order.
pub const EDUCATIONAL_SECTIONS: [Section<'static>; 3] = [
    UNDERSTANDING_RESULTS,
    CLINICAL_IMPLICATIONS,
    DIETARY_RECOMMENDATIONS,
];

/// Greedy word wrap at `max_chars`. Words longer than the width get their own line.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
