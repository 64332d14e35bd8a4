fn main() {
    let mut build = cc::Build::new();

    build
        .flag_if_supported("-std=c11")
        .flag_if_supported("-fPIC")
        .opt_level(3);

    println!("cargo:rerun-if-changed=src/helper/helper.c");
    build.file("src/helper/helper.c");
    build.compile("debmalloc_c");
}
