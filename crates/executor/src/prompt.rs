use crate::value::repr;
use synlogos_tools::ToolSpec;

/// Python-style signature, e.g. `read_file(path, offset=1, limit=2000)`.
pub fn signature(spec: &ToolSpec) -> String {
    let params: Vec<String> = spec
        .params
        .iter()
        .map(|p| match (&p.default, p.required) {
            (Some(default), _) => format!("{}={}", p.name, repr(default)),
            (None, false) => format!("{}=None", p.name),
            (None, true) => p.name.clone(),
        })
        .collect();
    format!("{}({})", spec.name, params.join(", "))
}

/// Instructions teaching the model to write orchestration code against
/// the given namespace.
pub fn orchestration_guide(tools: &[ToolSpec]) -> String {
    let listing: Vec<String> = tools
        .iter()
        .map(|spec| format!("  - await {}  # {}", signature(spec), spec.description))
        .collect();

    format!(
        r#"You can orchestrate several tool operations in one step by calling the `orchestrate` tool with Python code (or by replying with a ```orchestrate fenced block).

The code should:
1. Call tools with `await` (they behave like async functions)
2. Process the results inside the code
3. Report only the final answer with `print()`, a `result` variable, or `return`

Available tool functions:
{}

Each call returns an object with `.success`, `.output` and `.error`. A failed call does not stop the code; check `.error` yourself.

Example - read two files and count their lines:
```python
file1 = await read_file("src/main.rs")
file2 = await read_file("src/lib.rs")

if not file1.error and not file2.error:
    total_lines = len(file1.output.splitlines()) + len(file2.output.splitlines())
    print(f"Total lines: {{total_lines}}")
else:
    print("Error reading files")
```

Important:
- Process results in code instead of returning raw tool output
- Only printed output and the `result`/`return` value reach the conversation
- Run independent calls in parallel: `results = await asyncio.gather(*[read_file(p) for p in paths])`
- Only one orchestration is allowed per task; afterwards use direct tools or give the final answer
- No imports besides `asyncio` and `json`; no classes, lambdas or file access outside the tools"#,
        listing.join("\n")
    )
}
