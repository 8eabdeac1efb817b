use std::path::Path;
use synlogos_executor::orchestration_guide;
use synlogos_policy::ORCHESTRATE_TOOL;
use synlogos_tools::ToolSpec;

/// Compact system prompt naming the working directory, the tools and the
/// routing rule, followed by the orchestration guide and any extra
/// instructions.
pub fn build_system_prompt(workdir: &Path, tools: &[ToolSpec], instructions: &[String]) -> String {
    let mut names: Vec<&str> = tools.iter().map(|spec| spec.name.as_str()).collect();
    names.push(ORCHESTRATE_TOOL);

    let mut prompt = format!(
        "cwd:{}|tools:{}|rule:simple=direct,multi=orchestrate,ask=answer|err=explain",
        workdir.display(),
        names.join(",")
    );
    prompt.push_str("\n\n");
    prompt.push_str(&orchestration_guide(tools));

    for text in instructions.iter().filter(|text| !text.trim().is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(text.trim());
    }
    prompt
}
