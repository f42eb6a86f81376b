#![no_main]

use fleetwatch_detection::RuleLoader;
use fleetwatch_detection::rule::CompiledRule;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // YAML 파서는 &str을 받으므로 UTF-8 변환 필요
    if let Ok(yaml_str) = std::str::from_utf8(data) {
        if let Ok(table) = RuleLoader::parse_yaml(yaml_str, "fuzz-input.yml") {
            // 로딩된 규칙은 컴파일 실패 시 비활성화될 뿐 패닉하지 않아야 함
            for (_, rule) in table.iter() {
                let _ = CompiledRule::compile(rule.clone());
            }
        }
    }
});
