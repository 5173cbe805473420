/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    bpaf_config::mod.rs

    Command line arguments, parsed with bpaf.

*/

use std::path::PathBuf;

use crate::mount::{ChsSpec, MountSpec};

use bpaf::{Bpaf, Parser};

fn mount_arg() -> impl Parser<Vec<MountSpec>> {
    bpaf::short('m')
        .long("mount")
        .help("Mount a hard disk image with syntax: hd:0:disk.img")
        .argument::<String>("mountspec")
        .parse(|s| s.parse::<MountSpec>())
        .many()
}

#[derive(Bpaf, Debug, Default)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    #[bpaf(long("rom_dir"), long("romdir"))]
    pub rom_dir: Option<PathBuf>,

    /// Drive the self-test reads from
    #[bpaf(long)]
    pub drive: Option<usize>,

    /// Sector the self-test reads, as c:h:s
    #[bpaf(long)]
    pub chs: Option<ChsSpec>,

    /// Transfer self-test data by DMA instead of programmed IO
    #[bpaf(long, switch)]
    pub dma: bool,

    #[bpaf(external(mount_arg))]
    pub mounts: Vec<MountSpec>,
}
