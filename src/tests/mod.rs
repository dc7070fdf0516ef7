use crate::coding::{texture_declarations, Shader, KERNEL_PROLOGUE};
use crate::engine::BindingPlan;

fn plan(names: &[&str], destination: usize) -> BindingPlan {
    BindingPlan::for_destination(names.iter().copied(), destination)
}

#[test]
fn every_array_is_declared_in_registration_order() {
    let decls = texture_declarations(&plan(&["A", "B", "C"], 2), "");
    let lines: Vec<&str> = decls.lines().collect();
    assert_eq!(
        lines,
        [
            "@group(0) @binding(0) var A: texture_2d<f32>;",
            "@group(1) @binding(0) var<uniform> AScale: vec2<f32>;",
            "@group(0) @binding(1) var B: texture_2d<f32>;",
            "@group(1) @binding(1) var<uniform> BScale: vec2<f32>;",
            "@group(0) @binding(2) var C: texture_2d<f32>;",
            "@group(1) @binding(2) var<uniform> CScale: vec2<f32>;",
        ]
    );
}

#[test]
fn destination_texture_lands_outside_the_input_units() {
    let decls = texture_declarations(&plan(&["A", "B", "C"], 0), "");
    assert!(decls.contains("@group(0) @binding(2) var A: texture_2d<f32>;"));
    assert!(decls.contains("@group(0) @binding(0) var B: texture_2d<f32>;"));
    assert!(decls.contains("@group(0) @binding(1) var C: texture_2d<f32>;"));
    assert!(decls.contains("@group(1) @binding(0) var<uniform> AScale: vec2<f32>;"));
}

#[test]
fn utils_follow_the_declarations() {
    let utils = "fn twice(v: vec4<f32>) -> vec4<f32> { return v * 2.0; }\n";
    let decls = texture_declarations(&plan(&["A", "B"], 1), utils);
    assert!(decls.ends_with(utils));
    assert!(decls.find("BScale").unwrap() < decls.find("fn twice").unwrap());
}

#[test]
fn kernel_source_is_prologue_declarations_body() {
    let decls = texture_declarations(&plan(&["A", "B"], 1), "");
    let body = crate::kernel! { fn kernel() { commit(read(A) * 2.0); } };
    let shader = Shader::kernel(&decls, body);
    let source = shader.get_content();

    assert!(source.starts_with(KERNEL_PROLOGUE));
    let decl_at = source.find("var A: texture_2d<f32>").unwrap();
    let body_at = source.find("fn kernel()").unwrap();
    assert!(KERNEL_PROLOGUE.len() <= decl_at && decl_at < body_at);
    assert!(source.ends_with(body));
}
