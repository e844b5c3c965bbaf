//! Pipeline sequencing and cleanup, verified against the scripted session.
//!
//! The engine itself is simulated: the interesting properties are which
//! modules run in which order, what the rendered calls carry, and that no
//! temporary layer survives cleanup on either the success or the failure
//! path.

use std::io::Write as _;
use std::sync::Arc;

use grasskit_core::engine::mock::MockSession;
use grasskit_core::Context;
use grasskit_tools::{hydro, recode, similarity};

const REGION: &str = "projection=99\nzone=0\nn=221000\ns=220000\nw=637000\ne=638000\nnsres=10\newres=10\nrows=100\ncols=100\ncells=10000\n";

fn shared_context() -> (Context, Arc<MockSession>) {
    let session = Arc::new(MockSession::new());
    (Context::new(Box::new(session.clone())), session)
}

fn flatten_params() -> hydro::FlattenParams {
    hydro::FlattenParams {
        input: "ground".to_string(),
        breaklines: None,
        water_elevation: "water".to_string(),
        water_elevation_stddev: "water_sd".to_string(),
        filled_elevation: None,
        percentile: 5.0,
        min_size: None,
        keep_intermediates: false,
    }
}

#[test]
fn hydro_flatten_runs_the_stages_in_dependency_order() {
    let (ctx, session) = shared_context();
    session.seed_layer("ground");
    session.respond("g.region", REGION);
    session.respond("g.region", REGION);

    hydro::run(&ctx, &flatten_params()).unwrap();

    let log = session.log();
    let position = |needle: &str| {
        log.iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("no call matching '{needle}' in {log:#?}"))
    };
    let fill = position("r.fill.stats");
    let buffer = position("r.buffer");
    let reclass = position("r.reclass");
    let clump = position("r.clump");
    let quantile = position("r.stats.quantile");
    let zonal = position("method=average");
    assert!(fill < buffer && buffer < reclass && reclass < clump);
    assert!(clump < quantile && quantile < zonal);

    // Four one-cell strips at 10 m resolution, metric units.
    assert!(log[buffer].contains("distances=10,20,30,40"));
    assert!(log[buffer].contains("units=meters"));
    assert!(log[quantile].contains("percentiles=5"));
    // The final surfaces get the input's color table and a history record.
    assert!(log.iter().any(|l| l == "r.colors map=water raster=ground"));
    assert!(log.iter().any(|l| l == "r.colors map=water_sd color=reds"));
    assert!(log.iter().any(|l| l.starts_with("r.support map=water ")));
}

#[test]
fn hydro_flatten_cleanup_is_complete_after_success() {
    let (ctx, session) = shared_context();
    session.seed_layer("ground");
    session.respond("g.region", REGION);
    session.respond("g.region", REGION);

    hydro::run(&ctx, &flatten_params()).unwrap();
    drop(ctx);

    // Everything the pipeline created by name is gone again; only the
    // seeded input remains in the namespace.
    assert_eq!(session.layer_names(), vec!["ground"]);
}

#[test]
fn hydro_flatten_cleanup_is_complete_after_midway_failure() {
    let (ctx, session) = shared_context();
    session.seed_layer("ground");
    session.respond("g.region", REGION);
    session.respond("g.region", REGION);
    // Fail at the clump stage: exists-check, two region reads, fill,
    // holes, buffer, reclass, then clump.
    session.fail_at(8);

    let result = hydro::run(&ctx, &flatten_params());
    assert!(result.is_err());
    drop(ctx);

    assert_eq!(session.layer_names(), vec!["ground"]);
}

#[test]
fn mess_builds_the_similarity_layers_and_their_minimum() {
    let (ctx, session) = shared_context();
    session.seed_layer("bio1");
    session.respond("r.stats", "100;10\n200;10\n300;20\n");
    session.respond("r.univar", "min=50\nmax=400\n");

    let params = similarity::MessParams {
        ref_env: vec!["bio1".to_string()],
        sample: similarity::ReferenceSample::CurrentRegion,
        proj_env: None,
        proj_region: None,
        output: "out".to_string(),
        digits: 0,
        most_dissimilar: false,
        novelty: false,
        sum_negative: false,
        count_negative: false,
        drop_individual: false,
        nprocs: 1,
        memory_mb: 300,
    };
    similarity::run(&ctx, &params).unwrap();

    let log = session.log();
    // The projection raster is recoded to percentiles and mapped through
    // the 4-branch formula with the observed extremes 100 and 300.
    let expression = log
        .iter()
        .find(|line| line.contains("== 0,"))
        .expect("similarity expression missing");
    assert!(expression.contains("- 100) / (300 - 100) * 100.0"));
    assert!(expression.contains("<= 50, 2 * float("));
    assert!(expression.contains("(300 - float("));
    assert!(log
        .iter()
        .any(|line| line.starts_with("r.series output=out_MES input=out_bio1 method=minimum")));

    drop(ctx);
    // Temporary layers and saved regions are gone; the input and the final
    // surface remain.
    assert_eq!(session.layer_names(), vec!["bio1", "out_MES"]);
}

#[test]
fn mess_rejects_an_active_mask() {
    let (ctx, session) = shared_context();
    session.seed_layer("MASK");
    let params = similarity::MessParams {
        ref_env: vec!["bio1".to_string()],
        sample: similarity::ReferenceSample::CurrentRegion,
        proj_env: None,
        proj_region: None,
        output: "out".to_string(),
        digits: 3,
        most_dissimilar: false,
        novelty: false,
        sum_negative: false,
        count_negative: false,
        drop_individual: false,
        nprocs: 1,
        memory_mb: 300,
    };
    let err = similarity::run(&ctx, &params).unwrap_err();
    assert!(err.to_string().contains("MASK"));
}

#[test]
fn recode_attr_produces_one_layer_per_target_column() {
    let (ctx, session) = shared_context();
    session.seed_layer("landuse");
    let mut rules = tempfile::NamedTempFile::new().unwrap();
    writeln!(rules, "value,ph,cm").unwrap();
    writeln!(rules, "1,5.5,30").unwrap();
    writeln!(rules, "2,6.1,45").unwrap();

    let params = recode::RecodeAttrParams {
        input: "landuse".to_string(),
        outputs: vec!["soil".to_string()],
        rules: rules.path().to_path_buf(),
        delimiter: b',',
        align: false,
    };
    recode::run(&ctx, &params).unwrap();

    let log = session.log();
    let recodes: Vec<&String> = log.iter().filter(|l| l.starts_with("r.recode")).collect();
    assert_eq!(recodes.len(), 2);
    assert!(recodes[0].contains("input=landuse"));
    assert!(recodes[0].contains("output=soil_ph"));
    assert!(recodes[1].contains("output=soil_cm"));
    assert!(session.contains("soil_ph"));
    assert!(session.contains("soil_cm"));
}

#[test]
fn recode_attr_refuses_to_overwrite_an_existing_layer() {
    let (ctx, session) = shared_context();
    session.seed_layer("landuse");
    session.seed_layer("soil_ph");
    let mut rules = tempfile::NamedTempFile::new().unwrap();
    writeln!(rules, "value,ph").unwrap();
    writeln!(rules, "1,5.5").unwrap();

    let params = recode::RecodeAttrParams {
        input: "landuse".to_string(),
        outputs: vec!["soil".to_string()],
        rules: rules.path().to_path_buf(),
        delimiter: b',',
        align: false,
    };
    let err = recode::run(&ctx, &params).unwrap_err();
    assert!(err.to_string().contains("already exists"));
    // Nothing ran against the engine besides the existence check.
    assert!(session.log().iter().all(|l| !l.starts_with("r.recode")));
}
