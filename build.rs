fn main() {
    tonic_build::configure()
        .type_attribute(
            "build.bazel.remote.execution.v2.Digest",
            "#[derive(Eq, Hash)]",
        )
        .compile(
            &[
                "protos/build/bazel/remote/execution/v2/remote_execution.proto",
                "protos/build/bazel/remote/asset/v1/remote_asset.proto",
                "protos/asset/asset.proto",
                "protos/google/rpc/code.proto",
            ],
            &["protos"],
        )
        .unwrap();
}
