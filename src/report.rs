use std::fmt::Write;

use crate::models::Node;
use crate::snapshot::{AnalysisSnapshot, StudentDetail};
use crate::trend::TrendComparison;

pub fn most_chosen(snapshot: &AnalysisSnapshot) -> Vec<(&Node, usize)> {
    let mut ranked: Vec<(&Node, usize)> = snapshot
        .nodes
        .iter()
        .map(|node| (node, snapshot.in_degree(&node.id)))
        .filter(|(_, chosen)| *chosen > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
    ranked
}

pub fn never_chosen(snapshot: &AnalysisSnapshot) -> Vec<&Node> {
    snapshot
        .nodes
        .iter()
        .filter(|node| snapshot.in_degree(&node.id) == 0)
        .collect()
}

pub fn build_report(snapshot: &AnalysisSnapshot, survey_title: Option<&str>) -> String {
    let mut output = String::new();
    let metrics = &snapshot.metrics;
    let title = survey_title.unwrap_or(&snapshot.survey_id);

    let _ = writeln!(output, "# Friendship Network Report");
    let _ = writeln!(
        output,
        "Generated for {} (analysis run {})",
        title,
        snapshot.calculated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Network Summary");
    let _ = writeln!(output, "- Students: {}", metrics.total_students);
    let _ = writeln!(output, "- Friend selections: {}", metrics.total_relationships);
    let _ = writeln!(output, "- Density: {:.3}", metrics.density);
    let _ = writeln!(output, "- Average degree: {:.2}", metrics.average_degree);
    let _ = writeln!(
        output,
        "- Clustering coefficient: {:.3}",
        metrics.clustering_coefficient
    );
    let _ = writeln!(
        output,
        "- Average path length: {:.2}",
        metrics.average_path_length
    );
    let _ = writeln!(output, "- Modularity: {:.3}", metrics.modularity);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Friendship Types");

    if snapshot.nodes.is_empty() {
        let _ = writeln!(output, "No students in this survey's roster.");
    } else {
        for (band, count) in snapshot.type_distribution() {
            let _ = writeln!(output, "- {band}: {count} students");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Groups");

    if snapshot.communities.is_empty() {
        let _ = writeln!(output, "No groups detected.");
    } else {
        for community in &snapshot.communities {
            let _ = writeln!(
                output,
                "- Group {}: {} students (internal density {:.1}%)",
                community.id,
                community.size,
                community.internal_density * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Chosen Students");

    let ranked = most_chosen(snapshot);
    if ranked.is_empty() {
        let _ = writeln!(output, "No friend selections recorded.");
    } else {
        for (node, chosen) in ranked.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} (grade {}, class {}) chosen by {} classmates",
                node.name, node.grade, node.class, chosen
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Nobody Chose");

    let unchosen = never_chosen(snapshot);
    if unchosen.is_empty() {
        let _ = writeln!(output, "Every student was chosen at least once.");
    } else {
        for node in unchosen {
            let _ = writeln!(
                output,
                "- {} ({}, chose {} classmates)",
                node.name,
                node.friendship_type(),
                snapshot.out_degree(&node.id)
            );
        }
    }

    output
}

pub fn describe_student(detail: &StudentDetail, snapshot: &AnalysisSnapshot) -> String {
    let name_of = |id: &String| {
        snapshot
            .nodes
            .iter()
            .find(|node| &node.id == id)
            .map_or_else(|| id.clone(), |node| node.name.clone())
    };
    let list = |ids: &[String]| {
        if ids.is_empty() {
            "nobody".to_string()
        } else {
            ids.iter().map(&name_of).collect::<Vec<_>>().join(", ")
        }
    };

    let mut output = String::new();
    let node = &detail.node;
    let _ = writeln!(output, "{} (grade {}, class {})", node.name, node.grade, node.class);
    let _ = writeln!(
        output,
        "Type {} with centrality {:.2}, group {}",
        detail.friendship_type, node.centrality, node.community
    );
    let _ = writeln!(output, "Chose: {}", list(&detail.chose));
    let _ = writeln!(output, "Chosen by: {}", list(&detail.chosen_by));
    let _ = writeln!(output, "Mutual: {}", list(&detail.mutual));
    output
}

pub fn build_trend_report(comparison: &TrendComparison) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Friendship Trend Comparison");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Friendship Types By Survey");

    if comparison.rows.is_empty() {
        let _ = writeln!(output, "No analyses to compare.");
        return output;
    }

    for row in &comparison.rows {
        let mix = row
            .distribution
            .iter()
            .map(|(band, count)| format!("{band} {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            output,
            "- {} ({} students, density {:.3}): {}",
            row.survey_id, row.total_students, row.density, mix
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Moving To A Lower Band");

    let declining = comparison.declining();
    if declining.is_empty() {
        let _ = writeln!(output, "No student moved to a lower band.");
    } else {
        for (student_id, from, to) in declining {
            let _ = writeln!(output, "- {student_id}: {from} -> {to}");
        }
    }

    output
}
