pub mod build {
    pub mod bazel {
        pub mod remote {
            pub mod asset {
                pub mod v1 {
                    tonic::include_proto!("build.bazel.remote.asset.v1");
                }
            }
            pub mod execution {
                pub mod v2 {
                    tonic::include_proto!("build.bazel.remote.execution.v2");
                }
            }
        }
    }
}
pub mod google {
    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}
pub mod asset {
    tonic::include_proto!("asset");
}

pub mod actioncache;
pub mod assetstore;
pub mod fetch;
pub mod instance;
pub mod push;
pub mod qualifiers;
pub mod reference;
pub mod server;
pub mod storage;
pub mod util;
