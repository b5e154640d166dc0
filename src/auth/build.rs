// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The generated code is checked in. Only regenerate it on request, so
    // normal builds do not need `protoc`.
    #[cfg(feature = "_generate-protos")]
    {
        tonic_prost_build::configure()
            .build_client(true)
            .build_server(true)
            // The server only backs the fake sidecar in unit tests.
            .server_mod_attribute("secretprovider", "#[cfg(test)]")
            .out_dir("src/generated")
            .compile_protos(&["protos/secretprovider.proto"], &["protos"])?;
    }
    Ok(())
}
