// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use tox_secure_transport::identity::LocalIdentity;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let mut path = PathBuf::from(out_dir);
    std::fs::create_dir_all(&path)?;
    path.push("identity.key");

    let identity = LocalIdentity::generate()?;
    identity.save(&path)?;

    println!("noise public key:   {}", hex::encode(identity.noise.public_bytes()));
    println!("signing public key: {}", hex::encode(identity.signing_public_key()));
    println!("written to {}", path.display());
    Ok(())
}
