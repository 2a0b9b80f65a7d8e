use std::path::Path;

use serde::Serialize;
use threadscope::{classfile::descriptor::to_dotted, prelude::*};

use crate::{
    app::{GlobalOptions, TransformOptions},
    commands::common::{class_path, load_inputs, transformer},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct SiteInfo {
    method: String,
    offset: u32,
    invoke: &'static str,
    call: String,
    declared_by: Option<String>,
    unresolved: Option<String>,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct ClassSites {
    class: String,
    excluded: bool,
    sites: Vec<SiteInfo>,
}

#[derive(Debug, Serialize)]
struct ScanReport {
    files: usize,
    skipped: Vec<String>,
    classes: Vec<ClassSites>,
}

pub fn run(input: &Path, options: &TransformOptions, opts: &GlobalOptions) -> anyhow::Result<()> {
    let inputs = load_inputs(input)?;
    let source = class_path(input, &inputs, &options.classpath)?;
    let (logger, _) = Logger::memory();
    let transformer = transformer(options, &source, logger)?;

    let mut report = ScanReport {
        files: inputs.len(),
        skipped: Vec::new(),
        classes: Vec::new(),
    };

    for input in &inputs {
        let class = match ClassFileEditor.parse(&input.bytes) {
            Ok(class) => class,
            Err(error) => {
                log::warn!("Skipping {}: {}", input.path.display(), error);
                report.skipped.push(input.relative.display().to_string());
                continue;
            }
        };

        let excluded = transformer.config().excludes(&input.name).is_some();
        let sites: Vec<SiteInfo> = transformer
            .inspect(&class, &source)?
            .into_iter()
            .filter(|decision| Operation::from_method_name(&decision.site.name).is_some())
            .map(|decision| site_info(&class, decision, excluded))
            .collect();

        if !sites.is_empty() {
            report.classes.push(ClassSites {
                class: to_dotted(&input.name),
                excluded,
                sites,
            });
        }
    }

    print_output(&report, opts, |report| {
        for class in &report.classes {
            println!("{}:", class.class);
            let mut table = TabWriter::new(&[
                ("OFFSET", Align::Right),
                ("METHOD", Align::Left),
                ("CALL", Align::Left),
                ("DECLARED BY", Align::Left),
                ("ACTION", Align::Left),
            ])
            .indent("  ");
            for site in &class.sites {
                table.row(vec![
                    site.offset.to_string(),
                    site.method.clone(),
                    format!("{} {}", site.invoke, site.call),
                    site.declared_by
                        .clone()
                        .or_else(|| site.unresolved.as_ref().map(|r| format!("? ({r})")))
                        .unwrap_or_else(|| "-".to_string()),
                    site.action.to_string(),
                ]);
            }
            table.print();
            println!();
        }

        let total: usize = report.classes.iter().map(|c| c.sites.len()).sum();
        let instrumented = report
            .classes
            .iter()
            .flat_map(|c| &c.sites)
            .filter(|s| s.action != "skip" && s.action != "excluded")
            .count();
        println!(
            "{} call sites in {} of {} classes, {} would be instrumented",
            total,
            report.classes.len(),
            report.files,
            instrumented
        );
        if !report.skipped.is_empty() {
            println!("Skipped {} unparseable files", report.skipped.len());
        }
    })
}

fn site_info(class: &impl EditableType, decision: SiteDecision, excluded: bool) -> SiteInfo {
    let (declared_by, unresolved) = match decision.resolution {
        Some(Resolution::Resolved { declaring }) => (Some(to_dotted(&declaring)), None),
        Some(Resolution::Unresolved { reason }) => (None, Some(reason)),
        None => (None, None),
    };

    let action = match &decision.probe {
        _ if excluded => "excluded",
        Some(probe) if probe.dump_stack => "trace + stack",
        Some(_) => "trace",
        None => "skip",
    };

    SiteInfo {
        method: class.enclosing_method(&decision.site),
        offset: decision.site.offset,
        invoke: decision.site.kind.into(),
        call: decision.site.signature(),
        declared_by,
        unresolved,
        action,
    }
}
