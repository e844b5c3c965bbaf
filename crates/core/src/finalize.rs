//! Result finalization
//!
//! Final outputs get a color table and a metadata/history record before the
//! tool exits. Both are plain module calls; this module only fixes the
//! conventions (rules fed on stdin, history assembled from the invocation).

use crate::context::Context;
use crate::engine::ModuleCall;
use crate::error::Result;

/// Where a color table comes from.
#[derive(Debug, Clone, Copy)]
pub enum ColorSource<'a> {
    /// A named color scheme shipped with the engine.
    Named(&'a str),
    /// Copy the color table of another raster.
    CopyFrom(&'a str),
    /// Explicit color rules, fed on stdin.
    Rules(&'a str),
}

/// Apply a color table to a raster layer.
pub fn apply_colors(ctx: &Context, map: &str, source: ColorSource<'_>) -> Result<()> {
    match source {
        ColorSource::Named(scheme) => ctx.run(
            &ModuleCall::new("r.colors")
                .option("map", map)
                .option("color", scheme),
        ),
        ColorSource::CopyFrom(raster) => ctx.run(
            &ModuleCall::new("r.colors")
                .option("map", map)
                .option("raster", raster),
        ),
        ColorSource::Rules(rules) => ctx.write(
            &ModuleCall::new("r.colors")
                .option("map", map)
                .option("rules", "-"),
            rules,
        ),
    }
}

/// Write category labels for an integer raster, fed on stdin.
pub fn write_categories(ctx: &Context, map: &str, separator: &str, rules: &str) -> Result<()> {
    ctx.write(
        &ModuleCall::new("r.category")
            .option("map", map)
            .option("separator", separator)
            .option("rules", "-"),
        rules,
    )
}

/// Render a one-line history record from the invocation that produced a
/// layer, `tool key=value ...` with empty options dropped.
pub fn command_history(tool: &str, options: &[(&str, String)]) -> String {
    let mut line = tool.to_string();
    for (key, value) in options {
        if value.is_empty() {
            continue;
        }
        line.push_str(&format!(" {key}={value}"));
    }
    line
}

/// Descriptive metadata stamped onto a final output layer.
#[derive(Debug, Clone, Default)]
pub struct LayerMetadata {
    pub title: Option<String>,
    pub units: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub history: Option<String>,
}

/// Stamp metadata and provenance onto a raster layer.
pub fn write_metadata(ctx: &Context, map: &str, metadata: &LayerMetadata) -> Result<()> {
    let mut call = ModuleCall::new("r.support").option("map", map);
    if let Some(title) = &metadata.title {
        call = call.option("title", title);
    }
    if let Some(units) = &metadata.units {
        call = call.option("units", units);
    }
    if let Some(description) = &metadata.description {
        call = call.option("description", description);
    }
    if let Some(source) = &metadata.source {
        call = call.option("source1", source);
    }
    if let Some(history) = &metadata.history {
        call = call.option("history", history);
    }
    ctx.run(&call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::shared_context;

    #[test]
    fn history_drops_empty_options() {
        let line = command_history(
            "hydro-flatten",
            &[
                ("input", "ground".to_string()),
                ("breaklines", String::new()),
                ("percentile", "5".to_string()),
            ],
        );
        assert_eq!(line, "hydro-flatten input=ground percentile=5");
    }

    #[test]
    fn color_sources_render_the_right_calls() {
        let (ctx, session) = shared_context();
        apply_colors(&ctx, "out", ColorSource::Named("reds")).unwrap();
        apply_colors(&ctx, "out", ColorSource::CopyFrom("ground")).unwrap();
        apply_colors(&ctx, "out", ColorSource::Rules("0% 244:109:67\n")).unwrap();
        let log = session.log();
        assert_eq!(log[0], "r.colors map=out color=reds");
        assert_eq!(log[1], "r.colors map=out raster=ground");
        assert_eq!(log[2], "r.colors map=out rules=-");
    }

    #[test]
    fn metadata_includes_only_set_fields() {
        let (ctx, session) = shared_context();
        let metadata = LayerMetadata {
            title: Some("Water elevation".to_string()),
            units: Some("meters".to_string()),
            ..Default::default()
        };
        write_metadata(&ctx, "water", &metadata).unwrap();
        assert_eq!(
            session.log()[0],
            "r.support map=water title=Water elevation units=meters"
        );
    }
}
