//! # Markdown rendering of procedures
//!
//! Turns a [`Procedure`] into the exact guide text shown to the user. Step
//! text is reproduced verbatim and never paraphrased; this renderer is the
//! only place guide prose is assembled, so its output is what support staff
//! have signed off on.
//!
//! Layout: `# How to {title}`, the description, numbered `**Step N:**` lines
//! (sectioned bodies get a `## {section}` heading before their steps, with
//! section notes as bullets after), then `## Prerequisites`,
//! `## Troubleshooting`, `## Tips` and `## Notes` bullet lists — each
//! omitted entirely when empty. Step numbering runs continuously across
//! sections.

use crate::procedure::{Body, Procedure};

/// Render a procedure as a self-contained Markdown guide.
pub fn render(procedure: &Procedure) -> String {
    let mut out = String::new();

    out.push_str(&format!("# How to {}\n\n", procedure.title));
    out.push_str(&format!("{}\n", procedure.description));

    match &procedure.body {
        Body::Steps(steps) => {
            out.push('\n');
            for (n, step) in steps.iter().enumerate() {
                out.push_str(&format!("**Step {}:** {}\n", n + 1, step));
            }
        }
        Body::Sections(sections) => {
            let mut n = 0;
            for section in sections {
                out.push_str(&format!("\n## {}\n\n", section.name));
                for step in &section.steps {
                    n += 1;
                    out.push_str(&format!("**Step {n}:** {step}\n"));
                }
                for note in &section.notes {
                    out.push_str(&format!("- {note}\n"));
                }
            }
        }
    }

    push_bullets(&mut out, "Prerequisites", &procedure.prerequisites);
    push_bullets(&mut out, "Troubleshooting", &procedure.troubleshooting);
    push_bullets(&mut out, "Tips", &procedure.tips);
    push_bullets(&mut out, "Notes", &procedure.notes);

    out
}

fn push_bullets(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_simple_procedure_verbatim() {
        let raw = json!({
            "title": "Upload an Asset",
            "description": "How to add new files to the platform.",
            "keywords": ["upload", "add file", "import"],
            "steps": ["Open the upload panel.", "Drag your files in."],
            "notes": "Large files may take a while."
        });
        let p = Procedure::from_json("upload_asset", "", &raw, "x.json").unwrap();

        assert_eq!(
            render(&p),
            "# How to Upload an Asset\n\
             \n\
             How to add new files to the platform.\n\
             \n\
             **Step 1:** Open the upload panel.\n\
             **Step 2:** Drag your files in.\n\
             \n\
             ## Notes\n\
             \n\
             - Large files may take a while.\n"
        );
    }

    #[test]
    fn sectioned_body_numbers_steps_continuously() {
        let raw = json!({
            "title": "Asset Workflow",
            "description": "Set up review workflows.",
            "keywords": ["workflow", "approval", "review"],
            "sections": [
                {"name": "Create the workflow", "steps": ["Open Workflows.", "Press New."]},
                {"name": "Assign reviewers", "steps": ["Pick a reviewer."],
                 "notes": ["Reviewers get an email."]}
            ],
            "prerequisites": ["Admin role"]
        });
        let p = Procedure::from_json("asset_workflow", "", &raw, "x.json").unwrap();
        let text = render(&p);

        assert!(text.contains("## Create the workflow"));
        assert!(text.contains("**Step 2:** Press New."));
        // numbering continues into the second section
        assert!(text.contains("**Step 3:** Pick a reviewer."));
        assert!(text.contains("- Reviewers get an email."));
        assert!(text.contains("## Prerequisites\n\n- Admin role\n"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let raw = json!({
            "title": "T",
            "description": "D",
            "keywords": ["a", "b", "c"],
            "steps": ["one", "two"]
        });
        let p = Procedure::from_json("t", "", &raw, "x.json").unwrap();
        let text = render(&p);

        assert!(!text.contains("## Prerequisites"));
        assert!(!text.contains("## Troubleshooting"));
        assert!(!text.contains("## Tips"));
        assert!(!text.contains("## Notes"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let raw = json!({
            "title": "T",
            "description": "D",
            "keywords": ["a", "b", "c"],
            "steps": ["one", "two"],
            "tips": ["shortcut exists"]
        });
        let p = Procedure::from_json("t", "", &raw, "x.json").unwrap();
        assert_eq!(render(&p), render(&p));
    }
}
