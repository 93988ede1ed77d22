// generated by `cargo xtask gen-identifiers` from bifrost-bootstrap/hooks.toml. Do not edit by hand.
use bifrost_common::{HookIdentifier, HookKind};

pub fn identifiers() -> Vec<HookIdentifier> {
    vec![
        HookIdentifier {
            id: 1,
            name: "create_file".to_string(),
            module: "kernel32.dll".to_string(),
            kind: HookKind::CFunction,
            symbol: "CreateFileW".to_string(),
        },
        HookIdentifier {
            id: 2,
            name: "write_file".to_string(),
            module: "kernel32.dll".to_string(),
            kind: HookKind::CFunction,
            symbol: "WriteFile".to_string(),
        },
    ]
}
