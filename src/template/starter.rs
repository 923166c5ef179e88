//! The LiveViewJS starter project seeded into new sandboxes.
//!
//! File contents live under `starter/` at the crate root and are compiled in.

use super::FileTree;

/// Path of the file bound to the editable surface.
pub const EDITABLE_PATH: &str = "/src/server/liveview/hello.ts";

/// Builds the starter project tree.
pub fn project() -> FileTree {
    let liveview = FileTree::new()
        .with_file(
            "hello.ts",
            include_str!("../../starter/src/server/liveview/hello.ts"),
        )
        .with_file(
            "router.ts",
            include_str!("../../starter/src/server/liveview/router.ts"),
        );

    let server = FileTree::new()
        .with_directory("liveview", liveview)
        .with_file(
            "autorun.ts",
            include_str!("../../starter/src/server/autorun.ts"),
        )
        .with_file(
            "express.ts",
            include_str!("../../starter/src/server/express.ts"),
        )
        .with_file("index.ts", include_str!("../../starter/src/server/index.ts"))
        .with_file(
            "liveTemplates.ts",
            include_str!("../../starter/src/server/liveTemplates.ts"),
        );

    let client =
        FileTree::new().with_file("index.ts", include_str!("../../starter/src/client/index.ts"));

    FileTree::new()
        .with_directory(
            "src",
            FileTree::new()
                .with_directory("client", client)
                .with_directory("server", server),
        )
        .with_file("package.json", include_str!("../../starter/package.json"))
        .with_file("tsconfig.json", include_str!("../../starter/tsconfig.json"))
        .with_file(
            "tsconfig.client.json",
            include_str!("../../starter/tsconfig.client.json"),
        )
}
