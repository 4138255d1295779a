/// Feature-disable switches for endpoints that reject parts of the wire
/// protocol their dialect normally supports.
///
/// These gate structural branches in the translators; the parameter
/// strip-list handles simple key removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuirkFlags {
    /// The endpoint cannot stream JSON-mode responses; structured
    /// streaming falls back to a simulated stream.
    pub disable_json_streaming: bool,
    /// Ask the endpoint for at most one tool call per response.
    pub disable_parallel_tool_calls: bool,
    /// The endpoint rejects `strict` JSON-Schema enforcement.
    pub disable_strict_json_schema: bool,
    /// The endpoint rejects tool-choice selectors; a specific choice
    /// degrades to `auto`.
    pub disable_tool_choice: bool,
}
